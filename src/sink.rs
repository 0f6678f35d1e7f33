//! Where fired triggers go.

use std::{
    error::Error,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::mpsc::Sender,
};

use log::{error, warn};

use crate::trigger::{Trigger, TriggerId};

pub type SinkError = Box<dyn Error + Send + Sync>;
pub type SinkResult = Result<(), SinkError>;

/// Receives every trigger that fires.
///
/// Called on the poll thread with no scheduler lock held, so an
/// implementation may block or call back into the scheduler. Anything that
/// must run on another thread (a UI, an audio device) is the sink's job to
/// hand off.
pub trait NotificationSink: Send + Sync {
    fn on_fire(&self, trigger: &Trigger) -> SinkResult;
}

impl<F> NotificationSink for F
where
    F: Fn(&Trigger) -> SinkResult + Send + Sync,
{
    fn on_fire(&self, trigger: &Trigger) -> SinkResult {
        self(trigger)
    }
}

/// Calls the sink for one trigger. Errors and panics are logged and
/// swallowed so one bad notification can't stop the rest of the tick.
pub(crate) fn dispatch(sink: &dyn NotificationSink, trigger: &Trigger) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.on_fire(trigger))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("notification for trigger {} failed: {e}", trigger.id());
            false
        }
        Err(_) => {
            error!("notification for trigger {} panicked", trigger.id());
            false
        }
    }
}

/// A fired reminder, ready for whoever plays it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    pub trigger_id: TriggerId,
    pub message: String,
    pub sound: Option<PathBuf>,
    pub volume: f32,
}

/// Forwards fired triggers over a channel as [`Ring`]s, filling in the
/// default sound and volume.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Ring>,
    default_sound: Option<PathBuf>,
    volume: f32,
}

impl ChannelSink {
    #[must_use]
    pub const fn new(sender: Sender<Ring>, default_sound: Option<PathBuf>, volume: f32) -> Self {
        Self {
            sender,
            default_sound,
            volume,
        }
    }
}

impl NotificationSink for ChannelSink {
    fn on_fire(&self, trigger: &Trigger) -> SinkResult {
        let ring = Ring {
            trigger_id: trigger.id().clone(),
            message: trigger.message().to_string(),
            // no sound on the trigger means use the default one
            sound: trigger
                .audio_file()
                .map(PathBuf::from)
                .or_else(|| self.default_sound.clone()),
            volume: self.volume,
        };
        self.sender.send(ring)?;
        Ok(())
    }
}
