use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use scopeguard::ScopeGuard;

use crate::detection::domain::attribute_provider::{AttributeProvider, EnrichmentError};
use crate::detection::domain::detected_face::{DetectedFace, FaceAttributes};
use crate::session::session_config::EnrichmentMode;
use crate::shared::frame::Frame;
use crate::shared::geometry::{Size, SourceRect};

/// Counts of one `enrich_all` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub enriched: usize,
    pub failed: usize,
}

/// Holds `crop` as a live crop until the returned guard is dropped, on
/// every exit path including unwinding.
fn hold_crop(crop: Frame, live: &AtomicUsize) -> ScopeGuard<Frame, impl FnOnce(Frame) + '_> {
    live.fetch_add(1, Ordering::SeqCst);
    scopeguard::guard(crop, move |_| {
        live.fetch_sub(1, Ordering::SeqCst);
    })
}

/// Fills in secondary attributes for the faces of one cycle.
///
/// Each face is cropped from the frame, resized to each provider's input
/// size and handed to every provider; results are merged in provider
/// order. A failing face ends up without attributes, the others are
/// unaffected.
pub struct AttributeEnricher {
    providers: Vec<Arc<dyn AttributeProvider>>,
    mode: EnrichmentMode,
    live_crops: AtomicUsize,
}

impl AttributeEnricher {
    pub fn new(providers: Vec<Arc<dyn AttributeProvider>>, mode: EnrichmentMode) -> Self {
        Self {
            providers,
            mode,
            live_crops: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != EnrichmentMode::Off && !self.providers.is_empty()
    }

    /// Crops currently held by in-progress enrichment calls.
    pub fn live_crops(&self) -> usize {
        self.live_crops.load(Ordering::SeqCst)
    }

    /// Runs every provider on the crop under `bounding_box`.
    ///
    /// Providers that fail are skipped as long as another one produced
    /// something; with no attributes at all the first error is returned.
    pub fn enrich_face(
        &self,
        frame: &Frame,
        bounding_box: &SourceRect,
    ) -> Result<FaceAttributes, EnrichmentError> {
        let crop = frame.crop(bounding_box).ok_or(EnrichmentError::EmptyCrop)?;
        let crop = hold_crop(crop, &self.live_crops);

        let mut attributes = FaceAttributes::default();
        let mut first_error = None;
        for provider in &self.providers {
            let result = match provider.input_size() {
                Some(size) if size != crop.size() => match resize_crop(&crop, size) {
                    Some(resized) => call_provider(provider.as_ref(), &resized),
                    None => Err(EnrichmentError::EmptyCrop),
                },
                _ => call_provider(provider.as_ref(), &crop),
            };
            match result {
                Ok(found) => attributes.merge(found),
                Err(e) => {
                    log::debug!("Attribute provider '{}' failed: {e}", provider.name());
                    first_error.get_or_insert(e);
                }
            }
        }
        drop(crop);

        match first_error {
            Some(e) if attributes.is_empty() => Err(e),
            _ => Ok(attributes),
        }
    }

    /// Enriches all `faces` in place and returns once every face has settled.
    pub fn enrich_all(&self, frame: &Frame, faces: &mut [DetectedFace]) -> EnrichmentSummary {
        if !self.is_enabled() || faces.is_empty() {
            return EnrichmentSummary::default();
        }

        let results: Vec<Result<FaceAttributes, EnrichmentError>> = match self.mode {
            EnrichmentMode::Parallel if faces.len() > 1 => faces
                .par_iter()
                .map(|face| self.enrich_face(frame, &face.bounding_box))
                .collect(),
            _ => faces
                .iter()
                .map(|face| self.enrich_face(frame, &face.bounding_box))
                .collect(),
        };

        let mut summary = EnrichmentSummary::default();
        for (face, result) in faces.iter_mut().zip(results) {
            match result {
                Ok(attributes) => {
                    face.attributes = attributes;
                    summary.enriched += 1;
                }
                Err(e) => {
                    log::warn!("Enrichment failed for face at {:?}: {e}", face.bounding_box);
                    face.attributes = FaceAttributes::default();
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

fn call_provider(
    provider: &dyn AttributeProvider,
    crop: &Frame,
) -> Result<FaceAttributes, EnrichmentError> {
    catch_unwind(AssertUnwindSafe(|| provider.enrich(crop)))
        .unwrap_or(Err(EnrichmentError::Panicked))
}

fn resize_crop(crop: &Frame, size: Size) -> Option<Frame> {
    if size.is_empty() {
        return None;
    }
    let view = image::ImageBuffer::<image::Rgb<u8>, &[u8]>::from_raw(
        crop.width(),
        crop.height(),
        crop.data(),
    )?;
    let resized = image::imageops::resize(
        &view,
        size.width,
        size.height,
        image::imageops::FilterType::Triangle,
    );
    Some(Frame::from_rgb_image(resized, crop.index()))
}
