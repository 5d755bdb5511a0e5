//! Debounced PRD autosave.
//!
//! Edits are coalesced in a background task; the merged patch is saved once
//! no edit has arrived for the debounce window. `save_now` flushes at once,
//! and dropping the handle cancels any pending save.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::ClientError;
use super::cache::{DataClient, QueryKey};
use crate::config::ClientSection;
use crate::store::PrdPatch;
use crate::store::models::Prd;

/// Quiet period after the last edit before saving.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Progress of the autosave, for display next to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Pending,
    Saving,
    Saved { version: i32 },
    Failed(String),
}

type FlushReply = oneshot::Sender<Result<Option<Prd>, ClientError>>;

enum Command {
    Edit(PrdPatch),
    Flush(FlushReply),
}

/// Later edits win field by field.
fn merge(into: &mut PrdPatch, next: PrdPatch) {
    if next.title.is_some() {
        into.title = next.title;
    }
    if next.content.is_some() {
        into.content = next.content;
    }
    if next.sections.is_some() {
        into.sections = next.sections;
    }
}

pub struct PrdAutosave {
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SaveState>,
    handle: JoinHandle<()>,
}

impl PrdAutosave {
    pub fn new(client: DataClient, prd_id: &str) -> Self {
        Self::with_debounce(client, prd_id, DEFAULT_DEBOUNCE)
    }

    pub fn from_config(client: DataClient, prd_id: &str, config: &ClientSection) -> Self {
        Self::with_debounce(client, prd_id, Duration::from_millis(config.autosave_debounce_ms))
    }

    pub fn with_debounce(client: DataClient, prd_id: &str, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SaveState::Idle);
        let handle = tokio::spawn(run(client, prd_id.to_string(), debounce, rx, state_tx));
        Self { tx, state, handle }
    }

    /// Record an edit and restart the debounce timer.
    pub fn edit(&self, patch: PrdPatch) {
        if patch.is_empty() {
            return;
        }
        if self.tx.send(Command::Edit(patch)).is_err() {
            tracing::warn!("PRD autosave task has stopped; edit dropped");
        }
    }

    /// Save pending edits immediately. Returns the saved PRD, or `None`
    /// when there was nothing to save.
    pub async fn save_now(&self) -> Result<Option<Prd>, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply_tx))
            .map_err(|_| ClientError::Transport("autosave task stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| ClientError::Transport("autosave task stopped".into()))?
    }

    pub fn state(&self) -> SaveState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.state.clone()
    }
}

impl Drop for PrdAutosave {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(
    client: DataClient,
    prd_id: String,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SaveState>,
) {
    let mut pending: Option<PrdPatch> = None;
    // The timer only runs after an edit; a failed save waits for the next one.
    let mut armed = false;
    loop {
        let command = if armed {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    armed = false;
                    let _ = save(&client, &prd_id, &mut pending, &state).await;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(Command::Edit(patch)) => {
                merge(pending.get_or_insert_with(PrdPatch::default), patch);
                armed = true;
                state.send_replace(SaveState::Pending);
            }
            Some(Command::Flush(reply)) => {
                armed = false;
                let result = save(&client, &prd_id, &mut pending, &state).await;
                let _ = reply.send(result);
            }
            None => {
                if pending.is_some() {
                    tracing::debug!(prd_id = %prd_id, "Autosave closed with unsaved edits");
                }
                break;
            }
        }
    }
}

/// Send `pending`. On failure the patch is put back so the next save
/// carries it along with any newer edits.
async fn save(
    client: &DataClient,
    prd_id: &str,
    pending: &mut Option<PrdPatch>,
    state: &watch::Sender<SaveState>,
) -> Result<Option<Prd>, ClientError> {
    let Some(patch) = pending.take() else {
        return Ok(None);
    };
    state.send_replace(SaveState::Saving);
    match client
        .update::<Prd, _>(&QueryKey::collection("prds"), prd_id, &patch)
        .await
    {
        Ok(prd) => {
            tracing::debug!(prd_id, version = prd.version, "PRD autosaved");
            state.send_replace(SaveState::Saved {
                version: prd.version,
            });
            Ok(Some(prd))
        }
        Err(e) => {
            tracing::warn!(prd_id, error = %e, "PRD autosave failed, keeping edits");
            *pending = Some(patch);
            state.send_replace(SaveState::Failed(e.to_string()));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::cache::fake::FakeRemote;
    use crate::store::models::PrdStatus;
    use reqwest::Method;
    use serde_json::Value;

    fn prd_reply(version: i32, title: &str) -> Result<Value, ClientError> {
        Ok(serde_json::to_value(Prd {
            id: "prd-1".into(),
            project_id: "p1".into(),
            title: title.into(),
            content: Some("- one".into()),
            sections: None,
            status: PrdStatus::Draft,
            version,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        })
        .unwrap())
    }

    fn title(t: &str) -> PrdPatch {
        PrdPatch {
            title: Some(t.into()),
            ..Default::default()
        }
    }

    fn content(c: &str) -> PrdPatch {
        PrdPatch {
            content: Some(Some(c.into())),
            ..Default::default()
        }
    }

    fn autosave(remote: &Arc<FakeRemote>) -> PrdAutosave {
        PrdAutosave::new(DataClient::new(remote.clone()), "prd-1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_are_coalesced_after_quiet_period() {
        let remote = Arc::new(FakeRemote::replying(vec![prd_reply(2, "Final")]));
        let saver = autosave(&remote);

        saver.edit(title("Draft"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        saver.edit(content("- ship it"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        saver.edit(title("Final"));
        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(remote.calls().is_empty());
        assert_eq!(saver.state(), SaveState::Pending);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        let (method, path, body) = &calls[0];
        assert_eq!(*method, Method::PATCH);
        assert_eq!(path, "/api/prds/prd-1");
        let body = body.as_ref().unwrap();
        assert_eq!(body["title"], "Final");
        assert_eq!(body["content"], "- ship it");
        assert_eq!(saver.state(), SaveState::Saved { version: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_now_flushes_without_waiting() {
        let remote = Arc::new(FakeRemote::replying(vec![prd_reply(3, "Now")]));
        let saver = autosave(&remote);

        saver.edit(title("Now"));
        let saved = saver.save_now().await.unwrap().unwrap();
        assert_eq!(saved.version, 3);
        assert_eq!(remote.calls().len(), 1);

        // The flushed edit is not saved a second time.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.calls().len(), 1);
        assert!(saver.save_now().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_save() {
        let remote = Arc::new(FakeRemote::replying(vec![prd_reply(2, "Lost")]));
        let saver = autosave(&remote);
        saver.edit(title("Lost"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(saver);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_reports_error() {
        let remote = Arc::new(FakeRemote::replying(vec![Err(ClientError::Http {
            status: 400,
            message: "title is required".into(),
        })]));
        let saver = autosave(&remote);
        saver.edit(title(""));

        let err = saver.save_now().await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(matches!(saver.state(), SaveState::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_keeps_edits_for_next_save() {
        let remote = Arc::new(FakeRemote::replying(vec![
            Err(ClientError::Transport("connection reset".into())),
            prd_reply(2, "T"),
        ]));
        let saver = autosave(&remote);

        saver.edit(content("- keep me"));
        assert!(saver.save_now().await.is_err());

        // No retry until something new happens.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.calls().len(), 1);

        saver.edit(title("T"));
        saver.save_now().await.unwrap().unwrap();
        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        let body = calls[1].2.as_ref().unwrap();
        assert_eq!(body["title"], "T");
        assert_eq!(body["content"], "- keep me");
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_save_after_failure_resends_everything() {
        let remote = Arc::new(FakeRemote::replying(vec![
            Err(ClientError::Http {
                status: 503,
                message: "unavailable".into(),
            }),
            prd_reply(2, "Later"),
        ]));
        let saver = autosave(&remote);

        saver.edit(content("- first"));
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(remote.calls().len(), 1);
        assert!(matches!(saver.state(), SaveState::Failed(_)));

        saver.edit(title("Later"));
        tokio::time::sleep(Duration::from_millis(1600)).await;
        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        let body = calls[1].2.as_ref().unwrap();
        assert_eq!(body["content"], "- first");
        assert_eq!(body["title"], "Later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_uses_configured_debounce() {
        let remote = Arc::new(FakeRemote::replying(vec![prd_reply(2, "Quick")]));
        let config = ClientSection {
            autosave_debounce_ms: 200,
            ..ClientSection::default()
        };
        let saver = PrdAutosave::from_config(DataClient::new(remote.clone()), "prd-1", &config);

        saver.edit(title("Quick"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(remote.calls().is_empty());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(remote.calls().len(), 1);
        assert_eq!(saver.state(), SaveState::Saved { version: 2 });
    }

    #[test]
    fn test_merge_keeps_latest_fields() {
        let mut patch = title("a");
        merge(&mut patch, content("b"));
        merge(&mut patch, title("c"));
        assert_eq!(patch.title.as_deref(), Some("c"));
        assert_eq!(patch.content, Some(Some("b".into())));
        assert!(patch.sections.is_none());
    }
}
