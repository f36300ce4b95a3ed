//! Outgoing line pipeline
//!
//! A job's lines reach the wire through an ordered list of stages. Each stage
//! pulls from the stage before it and may rewrite, inject, hold or drop lines.
//! The order is fixed by [`Pipeline::standard`]:
//!
//! 1. source (job, recovery or idle)
//! 2. pause handling
//! 3. queued commands
//! 4. macros
//! 5. relative to absolute
//! 6. leveling
//! 7. temperature waits
//! 8. baby steps and tool offsets
//! 9. extrusion ratio
//! 10. feed-rate ratio
//! 11. temperature requests
//! 12. write regex
//!
//! A stage returns `None` when it has nothing right now and `Some("")` when it
//! consumed a line without producing one.

pub mod motion;
pub mod pause;
pub mod recovery;
pub mod regex_rules;
pub mod source;
pub mod stages;

pub use motion::{
    BabyStepStage, ExtrusionRatioStage, FeedRateRatioStage, LevelingSolution, LevelingStage,
    NoLeveling, RelativeToAbsoluteStage,
};
pub use pause::PauseStage;
pub use recovery::{RecoverySource, RecoveryState};
pub use regex_rules::{RegexRules, WriteRegexStage};
pub use source::{GcodeJob, IdleSource, JobProgress, JobSource};
pub use stages::{
    new_command_queue, CommandQueue, MacroStage, QueuedCommandsStage, TemperatureRequestStage,
    TemperatureWaitStage,
};

use crate::protocol::codec;
use printlink_core::{Move, PauseReason, SettingsSource, TemperatureState};
use std::sync::Arc;
use std::time::Instant;

/// Consecutive consumed lines tolerated in one pull before yielding
const MAX_CONSUMED_PER_PULL: usize = 256;

/// Flags that live as long as the pipeline and are visible to every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineFlags {
    /// Leveling may be applied (recovery clears this until homing completes)
    pub leveling_allowed: bool,
    /// A recovery source is still fast-forwarding or printing its first layer
    pub recovering: bool,
}

impl Default for PipelineFlags {
    fn default() -> Self {
        Self {
            leveling_allowed: true,
            recovering: false,
        }
    }
}

/// Something a stage reports back to the link
#[derive(Debug, Clone, PartialEq)]
pub enum StageSignal {
    /// Pause code finished running and the stream is now held
    PauseReached {
        /// Why the pause happened
        reason: PauseReason,
        /// One-based layer for layer pauses
        layer: Option<u32>,
        /// Position recorded for the resume moves
        position: Move,
    },
}

/// Out-of-band instruction delivered to every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCommand {
    /// Run the pause code and hold the source
    Pause(PauseReason),
    /// Run the resume code and release the source
    Resume,
}

/// Per-pull view of the world
pub struct StageContext<'a> {
    /// Live settings
    pub settings: &'a dyn SettingsSource,
    /// Latest temperatures
    pub temperatures: &'a TemperatureState,
    /// Time of this pull
    pub now: Instant,
    /// Pipeline-wide flags
    pub flags: &'a mut PipelineFlags,
    /// Signals raised during this pull
    pub signals: &'a mut Vec<StageSignal>,
}

/// The part of the pipeline upstream of a stage
pub trait Upstream {
    /// Next line from upstream
    fn next_line(&mut self, ctx: &mut StageContext<'_>) -> Option<String>;
}

/// First element of the pipeline
pub trait LineSource: Send {
    /// Next raw line, `None` when nothing is available or the source is done
    fn next_line(&mut self, ctx: &mut StageContext<'_>) -> Option<String>;

    /// Whether every line has been produced
    fn is_finished(&self) -> bool;

    /// Position reported by the printer
    fn set_position(&mut self, _position: &Move) {}
}

/// One transform in the chain
pub trait PipelineStage: Send {
    /// Stage name for logs
    fn name(&self) -> &'static str;

    /// Produce the next line, pulling from `upstream` as needed
    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>)
        -> Option<String>;

    /// Handle an out-of-band command, returning whether it applied
    fn control(&mut self, _command: StageCommand, _ctx: &mut StageContext<'_>) -> bool {
        false
    }

    /// Position reported by the printer, in the coordinates this stage emits.
    ///
    /// Returns the same position in the coordinates the stage reads, with its
    /// own rewrite undone.
    fn set_position(&mut self, position: &Move) -> Move {
        *position
    }

    /// Whether the stage holds nothing back
    fn is_idle(&self) -> bool {
        true
    }
}

struct Chain<'a, 'b> {
    source: &'a mut (dyn LineSource + 'b),
    stages: &'a mut [Box<dyn PipelineStage>],
}

impl Upstream for Chain<'_, '_> {
    fn next_line(&mut self, ctx: &mut StageContext<'_>) -> Option<String> {
        match self.stages.split_last_mut() {
            None => self.source.next_line(ctx),
            Some((last, rest)) => {
                let mut upstream = Chain {
                    source: &mut *self.source,
                    stages: rest,
                };
                last.next_line(&mut upstream, ctx)
            }
        }
    }
}

/// A source followed by its stages
pub struct Pipeline {
    source: Box<dyn LineSource>,
    stages: Vec<Box<dyn PipelineStage>>,
    flags: PipelineFlags,
    signals: Vec<StageSignal>,
}

impl Pipeline {
    /// Build a pipeline from a source and stages listed upstream first
    pub fn new(source: Box<dyn LineSource>, stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self {
            source,
            stages,
            flags: PipelineFlags::default(),
            signals: Vec::new(),
        }
    }

    /// The standard stage order
    pub fn standard(
        source: Box<dyn LineSource>,
        queue: CommandQueue,
        leveling: Arc<dyn LevelingSolution>,
    ) -> Self {
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(PauseStage::new()),
            Box::new(QueuedCommandsStage::new(queue)),
            Box::new(MacroStage::new()),
            Box::new(RelativeToAbsoluteStage::new()),
            Box::new(LevelingStage::new(leveling)),
            Box::new(TemperatureWaitStage::new()),
            Box::new(BabyStepStage::new()),
            Box::new(ExtrusionRatioStage::new()),
            Box::new(FeedRateRatioStage::new()),
            Box::new(TemperatureRequestStage::new()),
            Box::new(WriteRegexStage::new()),
        ];
        Self::new(source, stages)
    }

    /// Stage names, upstream first
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Next line worth sending: comment-only and consumed lines are skipped
    pub fn pull(
        &mut self,
        settings: &dyn SettingsSource,
        temperatures: &TemperatureState,
        now: Instant,
    ) -> Option<String> {
        for _ in 0..MAX_CONSUMED_PER_PULL {
            let mut ctx = StageContext {
                settings,
                temperatures,
                now,
                flags: &mut self.flags,
                signals: &mut self.signals,
            };
            let mut chain = Chain {
                source: self.source.as_mut(),
                stages: &mut self.stages,
            };
            let line = chain.next_line(&mut ctx)?;
            if codec::prepare_line(&line).is_some() {
                return Some(line);
            }
        }
        None
    }

    /// Deliver a command to every stage
    pub fn control(
        &mut self,
        command: StageCommand,
        settings: &dyn SettingsSource,
        temperatures: &TemperatureState,
        now: Instant,
    ) -> bool {
        let mut ctx = StageContext {
            settings,
            temperatures,
            now,
            flags: &mut self.flags,
            signals: &mut self.signals,
        };
        let mut handled = false;
        for stage in self.stages.iter_mut() {
            handled |= stage.control(command, &mut ctx);
        }
        handled
    }

    /// Tell every stage and the source where the printer reports it is.
    ///
    /// The report walks up from the printer side so each stage sees it in
    /// its own output coordinates.
    pub fn set_position(&mut self, position: &Move) {
        let mut upstream = *position;
        for stage in self.stages.iter_mut().rev() {
            upstream = stage.set_position(&upstream);
        }
        self.source.set_position(&upstream);
    }

    /// Signals raised since the last call
    pub fn take_signals(&mut self) -> Vec<StageSignal> {
        std::mem::take(&mut self.signals)
    }

    /// Pipeline-wide flags
    pub fn flags(&self) -> PipelineFlags {
        self.flags
    }

    /// The source is exhausted and no stage holds anything back
    pub fn is_drained(&self) -> bool {
        self.source.is_finished() && self.stages.iter().all(|stage| stage.is_idle())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("flags", &self.flags)
            .field("source_finished", &self.source.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printlink_core::EmptySettings;

    struct Upper;

    impl PipelineStage for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn next_line(
            &mut self,
            upstream: &mut dyn Upstream,
            ctx: &mut StageContext<'_>,
        ) -> Option<String> {
            upstream.next_line(ctx).map(|line| line.to_uppercase())
        }
    }

    struct Suffix(&'static str);

    impl PipelineStage for Suffix {
        fn name(&self) -> &'static str {
            "suffix"
        }

        fn next_line(
            &mut self,
            upstream: &mut dyn Upstream,
            ctx: &mut StageContext<'_>,
        ) -> Option<String> {
            upstream
                .next_line(ctx)
                .map(|line| format!("{} {}", line, self.0))
        }
    }

    #[test]
    fn test_stages_apply_upstream_first() {
        let job = GcodeJob::from_lines("t", ["g1 x1", "; comment only", "g28"]);
        let mut pipeline = Pipeline::new(
            Box::new(JobSource::new(job)),
            vec![Box::new(Upper), Box::new(Suffix("y2"))],
        );
        let temps = TemperatureState::new();
        let now = Instant::now();
        assert_eq!(
            pipeline.pull(&EmptySettings, &temps, now).as_deref(),
            Some("G1 X1 y2")
        );
        assert_eq!(
            pipeline.pull(&EmptySettings, &temps, now).as_deref(),
            Some("G28 y2")
        );
        assert_eq!(pipeline.pull(&EmptySettings, &temps, now), None);
        assert!(pipeline.is_drained());
    }

    #[test]
    fn test_standard_order() {
        let pipeline = Pipeline::standard(
            Box::new(IdleSource),
            new_command_queue(),
            Arc::new(NoLeveling),
        );
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "pause",
                "queued_commands",
                "macros",
                "relative_to_absolute",
                "leveling",
                "temperature_wait",
                "baby_steps",
                "extrusion_ratio",
                "feed_rate_ratio",
                "temperature_request",
                "write_regex",
            ]
        );
    }
}
