//! Read side: the combined result of a session.

use std::sync::Arc;

use log::{debug, warn};

use crate::error::ResultsError;
use crate::model::{CombinedResult, ResultStatus};
use crate::persistence::Persistence;
use crate::status::JobState;

pub struct ResultsAssembler {
    persistence: Arc<dyn Persistence>,
}

impl ResultsAssembler {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// The stored combined result, or one rebuilt from slide and shape rows
    /// when the stored copy is missing or unreadable.
    pub fn fetch(&self, session_id: &str) -> Result<CombinedResult, ResultsError> {
        match self.persistence.load_combined_result(session_id) {
            Ok(Some(result)) => return Ok(result),
            Ok(None) => debug!("No combined result for {}, rebuilding", session_id),
            Err(e) => warn!("Combined result of {} unusable, rebuilding: {}", session_id, e),
        }
        self.reconstruct(session_id)
    }

    fn reconstruct(&self, session_id: &str) -> Result<CombinedResult, ResultsError> {
        let slides = self.persistence.load_slide_records(session_id)?;
        if slides.is_empty() {
            return Err(ResultsError::NotFound(session_id.to_string()));
        }
        let shapes = self.persistence.load_shape_records(session_id)?;

        let completed = self
            .persistence
            .load_session_status(session_id)?
            .is_some_and(|s| s.terminal_status == JobState::Completed);
        let status = if completed {
            ResultStatus::Completed
        } else {
            ResultStatus::PartiallyCompleted
        };

        Ok(CombinedResult::from_parts(session_id, &slides, &shapes, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::{ShapeKind, ShapeRecord, SlideRenderResult};
    use crate::persistence::{DurableStatus, LocalPersistence};
    use crate::storage::AssetStore;

    fn setup() -> (tempfile::TempDir, Arc<LocalPersistence>, ResultsAssembler) {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(LocalPersistence::new(
            Database::open_in_memory().unwrap(),
            AssetStore::new(dir.path()),
        ));
        let assembler = ResultsAssembler::new(persistence.clone());
        (dir, persistence, assembler)
    }

    fn slides() -> Vec<SlideRenderResult> {
        (1..=2)
            .map(|n| SlideRenderResult {
                slide_number: n,
                image_ref: format!("s/slides/slide_{}.svg", n),
                thumbnail_ref: None,
                width: 960.0,
                height: 540.0,
            })
            .collect()
    }

    fn shapes() -> Vec<ShapeRecord> {
        let mut title = ShapeRecord::new("s1-2", 1, ShapeKind::Text, "Title", (1.0, 2.0, 3.0, 4.0));
        title.reading_order = 1;
        let mut body = ShapeRecord::new("s2-3", 2, ShapeKind::Text, "Body", (5.0, 6.0, 7.0, 8.0));
        body.reading_order = 1;
        vec![title, body]
    }

    fn store_rows(persistence: &LocalPersistence) {
        persistence.save_slide_records("s", &slides()).unwrap();
        persistence.save_shape_records("s", &shapes()).unwrap();
    }

    #[test]
    fn test_primary_and_fallback_paths_agree() {
        let (_dir, persistence, assembler) = setup();
        store_rows(&persistence);
        let combined =
            CombinedResult::from_parts("s", &slides(), &shapes(), ResultStatus::Completed);
        persistence.save_combined_result(&combined).unwrap();
        persistence
            .update_durable_status(&DurableStatus::new("j", "s", JobState::Completed, None))
            .unwrap();

        let primary = assembler.fetch("s").unwrap();
        let rebuilt = assembler.reconstruct("s").unwrap();
        assert_eq!(primary, combined);
        assert_eq!(rebuilt, primary);
    }

    #[test]
    fn test_rows_without_completion_are_partial() {
        let (_dir, persistence, assembler) = setup();
        store_rows(&persistence);

        let result = assembler.fetch("s").unwrap();
        assert_eq!(result.status, ResultStatus::PartiallyCompleted);
        assert_eq!(result.slide_count, 2);
        assert_eq!(result.slides[1].shapes[0].text, "Body");
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let (_dir, _persistence, assembler) = setup();
        assert!(matches!(
            assembler.fetch("nope"),
            Err(ResultsError::NotFound(id)) if id == "nope"
        ));
    }
}
