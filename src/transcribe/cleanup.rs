use std::time::Duration;

use super::Stage;
use crate::extractors::ExtractedAudio;
use crate::storage::{ObjectStore, ObjectUri};

/// Resources a job owns and the stage it is in.
///
/// Lives outside the cancellable stage future so owed cleanup can still run after a
/// failure, a timeout or cancellation. Released last-acquired first.
#[derive(Debug, Default)]
pub(crate) struct JobResources {
    stage: Stage,
    audio: Option<ExtractedAudio>,
    object: Option<ObjectUri>,
}

impl JobResources {
    pub(crate) fn enter(&mut self, stage: Stage) {
        tracing::debug!("Entering stage: {}", stage);
        self.stage = stage;
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn hold_audio(&mut self, audio: ExtractedAudio) {
        self.audio = Some(audio);
    }

    pub(crate) fn hold_object(&mut self, uri: ObjectUri) {
        self.object = Some(uri);
    }

    /// Release everything still owed. Returns warnings; never fails.
    pub(crate) async fn release(
        mut self,
        store: &dyn ObjectStore,
        timeout: Duration,
    ) -> Vec<String> {
        self.enter(Stage::CleaningUp);
        let mut warnings = Vec::new();

        if let Some(uri) = self.object.take() {
            match tokio::time::timeout(timeout, store.delete_object(&uri)).await {
                Ok(Ok(())) => tracing::debug!("Cleaned up {}", uri),
                Ok(Err(e)) => warnings.push(format!("failed to delete {}: {}", uri, e)),
                Err(_) => warnings.push(format!(
                    "deleting {} timed out after {}s",
                    uri,
                    timeout.as_secs()
                )),
            }
        }

        if let Some(audio) = self.audio.take() {
            let path = audio.path().display().to_string();
            match audio.remove() {
                Ok(()) => tracing::debug!("Removed temporary audio {}", path),
                Err(e) => {
                    warnings.push(format!("failed to remove temporary audio {}: {}", path, e))
                }
            }
        }

        for warning in &warnings {
            tracing::warn!("Cleanup warning: {}", warning);
        }

        warnings
    }
}
