use super::JobOutcome;
use crate::model::SongId;
use crossbeam::channel::{unbounded, Receiver, Sender};

/// Lifecycle callbacks of the batch scheduler
///
/// Callbacks run on worker threads. Implementations that drive a UI should
/// hand events over to their own thread, as [`ChannelListener`] does.
pub trait AnalysisListener: Send + Sync {
    fn on_start(&self, _song_id: SongId) {}

    /// Called exactly once per scheduled job, whatever its outcome
    fn on_finish(&self, _song_id: SongId, _outcome: &JobOutcome) {}

    /// Called once the last outstanding job has finished
    fn on_all_finished(&self) {}
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl AnalysisListener for NoopListener {}

/// Scheduler event as delivered by [`ChannelListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    Started(SongId),
    Finished(SongId, JobOutcome),
    AllFinished,
}

/// Forwards scheduler callbacks into a channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: Sender<AnalysisEvent>,
}

impl ChannelListener {
    /// Create the listener and the receiving end of its channel
    pub fn new() -> (Self, Receiver<AnalysisEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: AnalysisEvent) {
        // Receiver gone means nobody is watching anymore
        if self.tx.send(event).is_err() {
            log::trace!("Analysis event dropped, receiver disconnected");
        }
    }
}

impl AnalysisListener for ChannelListener {
    fn on_start(&self, song_id: SongId) {
        self.send(AnalysisEvent::Started(song_id));
    }

    fn on_finish(&self, song_id: SongId, outcome: &JobOutcome) {
        self.send(AnalysisEvent::Finished(song_id, outcome.clone()));
    }

    fn on_all_finished(&self) {
        self.send(AnalysisEvent::AllFinished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_listener_forwards_in_order() {
        let (listener, rx) = ChannelListener::new();
        listener.on_start(SongId(7));
        listener.on_finish(SongId(7), &JobOutcome::Completed(Some(128.0)));
        listener.on_all_finished();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                AnalysisEvent::Started(SongId(7)),
                AnalysisEvent::Finished(SongId(7), JobOutcome::Completed(Some(128.0))),
                AnalysisEvent::AllFinished,
            ]
        );
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);
        listener.on_all_finished();
    }
}
