//! The comparison flow shared by every front end:
//! input → model loading → descriptor extraction ×2 → comparison → status.

use crate::engine::{EngineError, EngineHandle};
use crate::input::{InputError, InputSource};
use crate::loader::ModelLoadError;
use crate::presenter::{Failure, Status, StatusSink};
use crate::sources::{ImageFetcher, ImageRef, ImageSlot, SourceError};
use facematch_core::{calibrated_threshold, compare, CompareError, Comparison, Descriptor, Frame};
use std::sync::Arc;
use thiserror::Error;

/// Loads the model set; the extractor it returns is the proof that loading finished.
#[allow(async_fn_in_trait)]
pub trait ModelLoader {
    type Extractor: DescriptorExtractor;

    async fn load(&self) -> Result<Self::Extractor, ModelLoadError>;
}

/// Turns a decoded image into a face descriptor.
#[allow(async_fn_in_trait)]
pub trait DescriptorExtractor {
    /// `Ok(None)` when no face was found.
    async fn describe(&self, frame: Arc<Frame>) -> Result<Option<Descriptor>, EngineError>;
}

impl DescriptorExtractor for EngineHandle {
    async fn describe(&self, frame: Arc<Frame>) -> Result<Option<Descriptor>, EngineError> {
        EngineHandle::describe(self, frame).await
    }
}

#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    MissingInput(#[from] InputError),
    #[error("model loading failed: {0}")]
    ModelLoad(#[from] ModelLoadError),
    #[error("image {index} could not be loaded: {source}")]
    ImageLoad { index: usize, source: SourceError },
    #[error("image {index} could not be analyzed: {source}")]
    Extraction { index: usize, source: EngineError },
    #[error("comparison failed: {0}")]
    Compare(#[from] CompareError),
}

impl AttemptError {
    pub fn failure(&self) -> Failure {
        match self {
            AttemptError::MissingInput(e) => e.failure(),
            AttemptError::ModelLoad(_) => Failure::ModelLoad,
            AttemptError::ImageLoad { .. } => Failure::ImageLoad,
            AttemptError::Extraction { .. } | AttemptError::Compare(_) => Failure::Processing,
        }
    }
}

/// How a comparison attempt that ran to completion ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Compared(Comparison),
    /// One or both images had no detectable face.
    NoFace,
}

impl Outcome {
    fn status(&self) -> Status {
        match self {
            Outcome::Compared(c) if c.same_person => Status::Success(c.distance),
            Outcome::Compared(c) => Status::Mismatch(c.distance),
            Outcome::NoFace => Status::Error(Failure::NoFace),
        }
    }
}

/// The display and control state every component reads and writes.
///
/// Holds the status area, the two image slots and whether the compare
/// trigger is enabled; components receive it explicitly.
pub struct UiContext {
    sink: Box<dyn StatusSink>,
    status: Status,
    images: [Option<ImageSlot>; 2],
    compare_enabled: bool,
    fetcher: ImageFetcher,
    /// Overrides the recognizer's calibrated threshold when set.
    threshold: Option<f32>,
}

impl UiContext {
    pub fn new(sink: Box<dyn StatusSink>, fetcher: ImageFetcher, threshold: Option<f32>) -> Self {
        Self {
            sink,
            status: Status::Idle,
            images: [None, None],
            compare_enabled: false,
            fetcher,
            threshold,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn compare_enabled(&self) -> bool {
        self.compare_enabled
    }

    pub fn show(&mut self, status: Status) {
        if status.is_terminal() {
            tracing::info!(?status, "attempt settled");
        } else {
            tracing::debug!(?status, "status");
        }
        self.sink.show(&status);
        self.status = status;
    }

    /// Point image slot `index` (0 or 1) at a new source and start loading it.
    pub fn set_image(&mut self, index: usize, source: ImageRef) {
        tracing::debug!(index, %source, "image source set");
        let slot = ImageSlot::new(source);
        let fetcher = self.fetcher.clone();
        let prefetch = slot.clone();
        tokio::spawn(async move {
            // The outcome stays in the slot; a later attempt reads it from there.
            let _ = prefetch.ready(&fetcher).await;
        });
        self.images[index] = Some(slot);
    }

    fn bind(&mut self, [first, second]: [ImageRef; 2]) {
        self.set_image(0, first);
        self.set_image(1, second);
    }

    /// Show a missing-input error without touching the models.
    pub fn reject(&mut self, err: InputError) {
        self.fail(&AttemptError::MissingInput(err));
    }

    fn fail(&mut self, err: &AttemptError) {
        tracing::error!(error = %err, "comparison attempt failed");
        self.show(Status::Error(err.failure()));
    }

    /// Show the busy state for model loading and disable the trigger.
    pub fn begin_loading(&mut self) {
        self.compare_enabled = false;
        self.show(Status::LoadingModels);
    }

    /// Record the result of model loading. The trigger is enabled only on success.
    pub fn finish_loading<X>(&mut self, loaded: Result<X, ModelLoadError>) -> Option<X> {
        match loaded {
            Ok(extractor) => {
                self.compare_enabled = true;
                Some(extractor)
            }
            Err(e) => {
                self.fail(&AttemptError::ModelLoad(e));
                None
            }
        }
    }

    /// Run one comparison on the currently bound images.
    ///
    /// Always ends in a terminal status, which is also returned.
    pub async fn compare_attempt<E: DescriptorExtractor>(&mut self, extractor: &E) -> Status {
        let [Some(first), Some(second)] = self.images.clone() else {
            self.fail(&AttemptError::MissingInput(InputError::MissingImage("image")));
            return self.status.clone();
        };

        self.show(Status::Analyzing);
        match analyze(&self.fetcher, extractor, [&first, &second], self.threshold).await {
            Ok(outcome) => {
                tracing::info!(?outcome, "comparison finished");
                self.show(outcome.status());
            }
            Err(e) => self.fail(&e),
        }
        self.status.clone()
    }
}

/// Load the models once. The returned extractor signals completion; `None`
/// means loading failed and the failure is already on display.
pub async fn initialize<L: ModelLoader>(ui: &mut UiContext, loader: &L) -> Option<L::Extractor> {
    ui.begin_loading();
    let loaded = loader.load().await;
    ui.finish_loading(loaded)
}

/// The whole single-shot flow: resolve inputs, load models, compare once.
///
/// Missing input stops the flow before any model is requested. A reference
/// that is present but unusable is bound anyway and fails as an image load.
pub async fn run_once<L: ModelLoader>(ui: &mut UiContext, source: &dyn InputSource, loader: &L) -> Status {
    match source.resolve() {
        Ok(images) => ui.bind(images),
        Err(e) => {
            ui.fail(&AttemptError::MissingInput(e));
            return ui.status.clone();
        }
    }

    let Some(extractor) = initialize(ui, loader).await else {
        return ui.status.clone();
    };
    ui.compare_attempt(&extractor).await
}

/// Both images are loaded and described together; either failing fails the attempt.
async fn analyze<E: DescriptorExtractor>(
    fetcher: &ImageFetcher,
    extractor: &E,
    [first, second]: [&ImageSlot; 2],
    threshold: Option<f32>,
) -> Result<Outcome, AttemptError> {
    let (a, b) = tokio::try_join!(
        describe_slot(fetcher, extractor, first, 1),
        describe_slot(fetcher, extractor, second, 2),
    )?;

    let (Some(a), Some(b)) = (a, b) else {
        return Ok(Outcome::NoFace);
    };

    let threshold = threshold.unwrap_or_else(|| calibrated_threshold(&a));
    Ok(Outcome::Compared(compare(&a, &b, threshold)?))
}

async fn describe_slot<E: DescriptorExtractor>(
    fetcher: &ImageFetcher,
    extractor: &E,
    slot: &ImageSlot,
    index: usize,
) -> Result<Option<Descriptor>, AttemptError> {
    let frame = slot
        .ready(fetcher)
        .await
        .map_err(|source| AttemptError::ImageLoad { index, source })?;
    extractor
        .describe(frame)
        .await
        .map_err(|source| AttemptError::Extraction { index, source })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::{PairSource, QuerySource};
    use crate::sources::tests::png_data_url;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every status shown.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder(Arc<Mutex<Vec<Status>>>);

    impl Recorder {
        pub(crate) fn seen(&self) -> Vec<Status> {
            self.0.lock().unwrap().clone()
        }
    }

    impl StatusSink for Recorder {
        fn show(&mut self, status: &Status) {
            self.0.lock().unwrap().push(status.clone());
        }
    }

    /// Maps image width to a canned descriptor; unknown widths have no face.
    #[derive(Clone, Default)]
    pub(crate) struct FakeExtractor {
        by_width: HashMap<u32, Vec<f32>>,
        version: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeExtractor {
        pub(crate) fn with(mut self, width: u32, values: &[f32]) -> Self {
            self.by_width.insert(width, values.to_vec());
            self
        }

        /// Tag every descriptor as produced by `version`.
        pub(crate) fn versioned(mut self, version: &str) -> Self {
            self.version = Some(version.to_string());
            self
        }
    }

    impl DescriptorExtractor for FakeExtractor {
        async fn describe(&self, frame: Arc<Frame>) -> Result<Option<Descriptor>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.by_width.get(&frame.width).map(|values| Descriptor {
                values: values.clone(),
                model_version: self.version.clone(),
            }))
        }
    }

    pub(crate) struct FakeLoader {
        pub(crate) result: Result<FakeExtractor, ModelLoadError>,
        pub(crate) loads: AtomicUsize,
    }

    impl FakeLoader {
        pub(crate) fn ok(extractor: FakeExtractor) -> Self {
            Self {
                result: Ok(extractor),
                loads: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                result: Err(ModelLoadError::NotFound {
                    model: facematch_core::ModelKind::Recognizer,
                    location: "./models/w600k_r50.onnx".into(),
                }),
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl ModelLoader for FakeLoader {
        type Extractor = FakeExtractor;

        async fn load(&self) -> Result<FakeExtractor, ModelLoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    pub(crate) fn ui(recorder: &Recorder) -> UiContext {
        let fetcher = ImageFetcher::new(reqwest::Client::new(), None);
        UiContext::new(Box::new(recorder.clone()), fetcher, None)
    }

    /// Descriptors at a known distance from the origin descriptor.
    fn at_distance(d: f32) -> [f32; 2] {
        [0.0, d]
    }

    fn query(w1: u32, w2: u32) -> String {
        format!(
            "?p1={}&p2={}",
            urlencoding::encode(&png_data_url(w1, 4)),
            urlencoding::encode(&png_data_url(w2, 4))
        )
    }

    #[tokio::test]
    async fn test_same_person_end_to_end() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let loader = FakeLoader::ok(FakeExtractor::default().with(10, &[0.0, 0.0]).with(20, &at_distance(0.42)));

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;

        assert_eq!(status, Status::Success(0.42));
        assert_eq!(
            rec.seen(),
            vec![Status::LoadingModels, Status::Analyzing, Status::Success(0.42)]
        );
        let text = status.message();
        assert!(text.contains("Son la misma persona") && text.contains("0.4200"), "{text}");
    }

    #[tokio::test]
    async fn test_different_people_end_to_end() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let loader = FakeLoader::ok(FakeExtractor::default().with(10, &[0.0, 0.0]).with(20, &at_distance(0.75)));

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;

        assert_eq!(status, Status::Mismatch(0.75));
        let text = status.message();
        assert!(text.contains("No son la misma persona") && text.contains("0.7500"), "{text}");
    }

    #[tokio::test]
    async fn test_threshold_boundary_is_mismatch() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let loader = FakeLoader::ok(FakeExtractor::default().with(10, &[0.0, 0.0]).with(20, &[0.0, 0.6]));

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;
        assert!(matches!(status, Status::Mismatch(_)), "{status:?}");
    }

    #[tokio::test]
    async fn test_arcface_descriptors_use_calibrated_threshold() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        // cosine 0.6 between unit vectors: distance ~0.894
        let extractor = FakeExtractor::default()
            .with(10, &[1.0, 0.0])
            .with(20, &[0.6, 0.8])
            .versioned(facematch_core::ARCFACE_MODEL_VERSION);
        let loader = FakeLoader::ok(extractor);

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;
        assert!(matches!(status, Status::Success(_)), "{status:?}");
    }

    #[tokio::test]
    async fn test_threshold_override_beats_calibration() {
        let rec = Recorder::default();
        let fetcher = ImageFetcher::new(reqwest::Client::new(), None);
        let mut ui = UiContext::new(Box::new(rec.clone()), fetcher, Some(0.5));
        let extractor = FakeExtractor::default()
            .with(10, &[1.0, 0.0])
            .with(20, &[0.6, 0.8])
            .versioned(facematch_core::ARCFACE_MODEL_VERSION);
        let loader = FakeLoader::ok(extractor);

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;
        assert!(matches!(status, Status::Mismatch(_)), "{status:?}");
    }

    #[tokio::test]
    async fn test_malformed_param_fails_as_image_load_after_models() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let loader = FakeLoader::ok(FakeExtractor::default().with(10, &[0.0, 0.0]));
        let query = format!(
            "?p1=data:image/png;base64,%2A%2A&p2={}",
            urlencoding::encode(&png_data_url(10, 4))
        );

        let status = run_once(&mut ui, &QuerySource::new(query, "/"), &loader).await;

        assert_eq!(status, Status::Error(Failure::ImageLoad));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(
            rec.seen(),
            vec![Status::LoadingModels, Status::Analyzing, Status::Error(Failure::ImageLoad)]
        );
    }

    #[tokio::test]
    async fn test_missing_param_never_loads_models() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let loader = FakeLoader::ok(FakeExtractor::default());

        let status = run_once(&mut ui, &QuerySource::new("?p1=https://a/x.jpg", "/"), &loader).await;

        assert_eq!(status, Status::Error(Failure::MissingInput));
        assert_eq!(rec.seen(), vec![Status::Error(Failure::MissingInput)]);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_load_failure_halts_before_analysis() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let loader = FakeLoader::failing();

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;

        assert_eq!(status, Status::Error(Failure::ModelLoad));
        assert_eq!(rec.seen(), vec![Status::LoadingModels, Status::Error(Failure::ModelLoad)]);
        assert!(!ui.compare_enabled());
    }

    #[tokio::test]
    async fn test_image_load_failure_skips_comparator() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let extractor = FakeExtractor::default().with(10, &[0.0, 0.0]);
        let calls = extractor.calls.clone();
        let loader = FakeLoader::ok(extractor);
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.jpg");
        let source = PairSource::new(png_data_url(10, 4), missing.to_string_lossy(), "/");

        let status = run_once(&mut ui, &source, &loader).await;

        assert_eq!(status, Status::Error(Failure::ImageLoad));
        assert!(calls.load(Ordering::SeqCst) <= 1, "no descriptor for the broken image");
    }

    #[tokio::test]
    async fn test_no_face_outcome() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        // width 20 is unknown to the fake: no face in the second image
        let loader = FakeLoader::ok(FakeExtractor::default().with(10, &[0.0, 0.0]));

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;

        assert_eq!(status, Status::Error(Failure::NoFace));
        assert_eq!(
            status.message(),
            "No se pudo detectar un rostro en una o ambas imágenes."
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_processing_failure() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let loader = FakeLoader::ok(FakeExtractor::default().with(10, &[0.0, 0.0]).with(20, &[0.0, 0.0, 0.0]));

        let status = run_once(&mut ui, &QuerySource::new(query(10, 20), "/"), &loader).await;
        assert_eq!(status, Status::Error(Failure::Processing));
    }

    #[tokio::test]
    async fn test_compare_without_images_is_missing_image() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let status = ui.compare_attempt(&FakeExtractor::default()).await;
        assert_eq!(status, Status::Error(Failure::MissingImage));
    }

    #[tokio::test]
    async fn test_repeat_attempt_restarts_from_analyzing() {
        let rec = Recorder::default();
        let mut ui = ui(&rec);
        let extractor = FakeExtractor::default()
            .with(10, &[0.0, 0.0])
            .with(20, &at_distance(0.3))
            .with(30, &at_distance(0.9));
        let loader = FakeLoader::ok(extractor);
        let extractor = initialize(&mut ui, &loader).await.expect("models load");

        ui.set_image(0, ImageRef::parse(&png_data_url(10, 4), Path::new("/")).unwrap());
        ui.set_image(1, ImageRef::parse(&png_data_url(20, 4), Path::new("/")).unwrap());
        assert_eq!(ui.compare_attempt(&extractor).await, Status::Success(0.3));

        ui.set_image(1, ImageRef::parse(&png_data_url(30, 4), Path::new("/")).unwrap());
        assert_eq!(ui.compare_attempt(&extractor).await, Status::Mismatch(0.9));

        assert_eq!(
            rec.seen(),
            vec![
                Status::LoadingModels,
                Status::Analyzing,
                Status::Success(0.3),
                Status::Analyzing,
                Status::Mismatch(0.9),
            ]
        );
    }
}
