use image::RgbImage;
use persona_core::extractor::ExtractorError;
use persona_core::store::StoreError;
use persona_core::{
    Config, EmbeddingExtractor, EmbeddingStore, MatchResult, OnnxExtractor, Persona,
    PersonaSummary, RecognitionError, Recognizer, SqliteStore,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error("model error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the controller to the engine thread.
enum EngineRequest {
    Analyze {
        face: RgbImage,
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
    Enroll {
        id: Option<String>,
        name: String,
        face: RgbImage,
        reply: oneshot::Sender<Result<Persona, EngineError>>,
    },
    Personas {
        reply: oneshot::Sender<Result<Vec<PersonaSummary>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Match a face crop against the enrolled personas.
    pub async fn analyze(&self, face: RgbImage) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze { face, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Store the face's embedding under `name`.
    pub async fn enroll(
        &self,
        id: Option<String>,
        name: String,
        face: RgbImage,
    ) -> Result<Persona, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                id,
                name,
                face,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn personas(&self) -> Result<Vec<PersonaSummary>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Personas { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the embedding model and open the store, then spawn the engine.
///
/// Fails fast at startup if either resource is unavailable.
pub fn open_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let extractor = OnnxExtractor::load(&config.model_path_str(), config.feature_vector_size)?;
    tracing::debug!(embedding_dim = extractor.embedding_dim(), "extractor ready");

    let store = SqliteStore::open(&config.db_path, config.store_layout)?;
    tracing::info!(
        path = %config.db_path.display(),
        layout = %config.store_layout,
        "store opened"
    );

    let recognizer = Recognizer::new(
        config.normalizer(),
        extractor,
        store,
        config.recognition_threshold,
    );
    Ok(spawn_engine(recognizer))
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the recognizer, so extraction and persistence are
/// serialized in request order.
pub fn spawn_engine<E, S>(mut recognizer: Recognizer<E, S>) -> EngineHandle
where
    E: EmbeddingExtractor + Send + 'static,
    S: EmbeddingStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("persona-engine".into())
        .spawn(move || {
            tracing::info!(threshold = recognizer.threshold(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { face, reply } => {
                        let result = recognizer.analyze(&face).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll {
                        id,
                        name,
                        face,
                        reply,
                    } => {
                        let result = recognizer
                            .enroll(id.as_deref(), &name, &face)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Personas { reply } => {
                        let result = recognizer.store().personas().map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_core::testing::{recognizer, solid};

    #[tokio::test]
    async fn test_analyze_then_enroll_then_recognize() {
        let engine = spawn_engine(recognizer());
        let face = solid(180, 20, 60);

        let first = engine.analyze(face.clone()).await.unwrap();
        assert!(matches!(first, MatchResult::Unknown { .. }));

        let persona = engine.enroll(None, "Ada".into(), face.clone()).await.unwrap();
        assert_eq!(persona.name, "Ada");

        match engine.analyze(face).await.unwrap() {
            MatchResult::Recognized { persona_id, persona_name, .. } => {
                assert_eq!(persona_id, persona.id);
                assert_eq!(persona_name, "Ada");
            }
            other => panic!("expected recognized, got {other:?}"),
        }

        let personas = engine.personas().await.unwrap();
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[0].embeddings, 1);
    }

    #[tokio::test]
    async fn test_enroll_error_is_returned() {
        let engine = spawn_engine(recognizer());
        let err = engine.enroll(None, "".into(), solid(1, 1, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Recognition(RecognitionError::InvalidEnrollment(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_image_is_returned() {
        let engine = spawn_engine(recognizer());
        let err = engine.analyze(RgbImage::new(0, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Recognition(RecognitionError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_open_engine_missing_model() {
        let mut config = Config::default();
        config.model_path = "/nonexistent/feature_vector.onnx".into();
        let err = open_engine(&config).err().expect("missing model must fail");
        assert!(matches!(err, EngineError::Extractor(ExtractorError::ModelNotFound(_))));
    }
}
