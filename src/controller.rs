// ================================
// src/controller.rs - per-frame pipeline and frame worker
// ================================
use crate::{
    config::{Topics, Tuning},
    control::{ControllerState, SteeringMapper, TargetSelector},
    error::FrameError,
    lidar::{GapExtractor, RangeFrame, RangeFramePreprocessor},
    params::ParameterStore,
};
use anyhow::Result;
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Depth of the frame queue between the transport and the worker.
pub const FRAME_QUEUE_DEPTH: usize = 10;

/// Minimum spacing of the per-command info log.
pub const COMMAND_LOG_PERIOD: Duration = Duration::from_secs(1);

/// Outbound command, one per processed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuationCommand {
    /// Within `[-steering_limit, steering_limit]`.
    pub steering: f32,
    pub throttle: f32,
}

/// Delivers commands to the vehicle.
pub trait ActuationPublisher: Send {
    fn publish(&mut self, command: &ActuationCommand) -> Result<()>;
}

/// Publisher that only logs, for bench runs without actuators.
pub struct LogPublisher {
    topics: Topics,
}

impl LogPublisher {
    pub fn new(topics: Topics) -> Self {
        Self { topics }
    }
}

impl ActuationPublisher for LogPublisher {
    fn publish(&mut self, command: &ActuationCommand) -> Result<()> {
        debug!(
            "{} <- {:.4}, {} <- {:.3}",
            self.topics.steering, command.steering, self.topics.throttle, command.throttle
        );
        Ok(())
    }
}

/// Follow-the-gap pipeline plus the carried steering state.
pub struct GapFollowController {
    params: ParameterStore,
    expected_samples: Option<usize>,
    preprocessor: RangeFramePreprocessor,
    gap_extractor: GapExtractor,
    target_selector: TargetSelector,
    steering_mapper: SteeringMapper,
    state: ControllerState,
}

impl GapFollowController {
    pub fn new(params: ParameterStore, tuning: &Tuning) -> Self {
        Self {
            params,
            expected_samples: tuning.expected_samples,
            preprocessor: RangeFramePreprocessor::new(tuning),
            gap_extractor: GapExtractor::new(tuning),
            target_selector: TargetSelector::new(tuning),
            steering_mapper: SteeringMapper::new(tuning),
            state: ControllerState::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    /// Run one frame through the pipeline.
    ///
    /// A rejected frame leaves the carried state untouched.
    pub fn process_frame(&mut self, frame: &RangeFrame) -> Result<ActuationCommand, FrameError> {
        frame.validate(self.expected_samples)?;

        // One snapshot for the whole frame
        let params = self.params.snapshot();
        let running_steering_angle = self.state.running_steering_angle;

        let processed = self.preprocessor.process(frame, &params);
        let gap = self
            .gap_extractor
            .find_max_gap(&processed.gaps, frame.len());
        let target = self
            .target_selector
            .find_best_point(&gap, frame, running_steering_angle);
        let steering = self.steering_mapper.steering_angle(&target, frame);

        debug!(
            "gap [{}, {}] target {} delta {} scale {} bubble {:?} -> steering {:.4}",
            gap.start_idx,
            gap.end_idx,
            target.index,
            target.delta,
            target.scale,
            processed.bubble,
            steering
        );

        self.state.running_steering_angle = steering;

        Ok(ActuationCommand {
            steering,
            throttle: params.throttle,
        })
    }
}

/// Gate that opens at most once per `period`.
#[derive(Debug)]
pub struct LogThrottle {
    period: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Serial consumer of range frames.
///
/// Frames that queue up while one is being processed are skipped in favour
/// of the newest.
pub struct FrameWorker<P: ActuationPublisher> {
    frames: mpsc::Receiver<RangeFrame>,
    controller: GapFollowController,
    publisher: P,
    command_log: LogThrottle,
}

impl<P: ActuationPublisher> FrameWorker<P> {
    pub fn new(
        frames: mpsc::Receiver<RangeFrame>,
        controller: GapFollowController,
        publisher: P,
    ) -> Self {
        Self {
            frames,
            controller,
            publisher,
            command_log: LogThrottle::new(COMMAND_LOG_PERIOD),
        }
    }

    pub fn controller(&self) -> &GapFollowController {
        &self.controller
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Process frames until every sender is dropped.
    pub async fn run(mut self) -> Self {
        while let Some(frame) = self.frames.recv().await {
            // Skip old frames and process only the latest
            let mut latest = frame;
            let mut skipped = 0usize;
            while let Ok(newer) = self.frames.try_recv() {
                latest = newer;
                skipped += 1;
            }
            if skipped > 0 {
                debug!("Skipped {} stale frames", skipped);
            }

            self.handle_frame(&latest);
        }
        self
    }

    fn handle_frame(&mut self, frame: &RangeFrame) {
        let command = match self.controller.process_frame(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping range frame: {}", e);
                return;
            }
        };

        if self.command_log.ready() {
            info!(
                "Steering angle: {:.4}, Throttle: {:.3}",
                command.steering, command.throttle
            );
        }

        if let Err(e) = self.publisher.publish(&command) {
            warn!("Failed to publish actuation command: {}", e);
        }
    }
}
