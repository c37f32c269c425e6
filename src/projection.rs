//! Field projections.
//!
//! A projection is a document mapping dotted paths to `0` (omit) or `1`
//! (pick). The two modes cannot be mixed, except that `_id` may always be
//! toggled explicitly; it is kept by default.

use crate::common::{Value, DOC_ID};
use crate::document::Document;
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use crate::update::{set_path, unset_path};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProjectionMode {
    /// No projection: documents pass through unchanged.
    Identity,
    /// Build a new document from the listed paths.
    Pick,
    /// Copy the document and remove the listed paths.
    Omit,
}

/// A parsed projection, ready to be applied to result documents.
#[derive(Clone, Debug)]
pub struct Projection {
    mode: ProjectionMode,
    paths: Vec<String>,
    keep_id: bool,
}

impl Projection {
    /// The identity projection.
    pub fn identity() -> Projection {
        Projection {
            mode: ProjectionMode::Identity,
            paths: Vec::new(),
            keep_id: true,
        }
    }

    /// Parses a projection document.
    ///
    /// # Errors
    ///
    /// - `MixedProjection` when `0` and `1` are mixed for non-`_id` paths
    /// - `InvalidDataType` when a value is not `0` or `1`
    pub fn parse(projection: &Document) -> LigniteResult<Projection> {
        if projection.is_empty() {
            return Ok(Projection::identity());
        }

        let mut keep_id = true;
        let mut action: Option<bool> = None;
        let mut paths = Vec::with_capacity(projection.len());

        for (key, value) in projection.iter() {
            let picked = match value {
                Value::Number(n) if *n == 0.0 => false,
                Value::Number(n) if *n == 1.0 => true,
                _ => {
                    return Err(LigniteError::new(
                        &format!("Can't project {} with a value other than 0 and 1", key),
                        ErrorKind::InvalidDataType,
                    ))
                }
            };
            if key == DOC_ID {
                keep_id = picked;
                continue;
            }
            match action {
                None => action = Some(picked),
                Some(previous) if previous != picked => {
                    log::error!("Projection mixes picked and omitted fields");
                    return Err(LigniteError::new(
                        "Can't both keep and omit fields except for _id",
                        ErrorKind::MixedProjection,
                    ));
                }
                Some(_) => {}
            }
            paths.push(key.clone());
        }

        let mode = match action {
            Some(true) => ProjectionMode::Pick,
            // an `_id`-only projection behaves like an omit of nothing
            Some(false) | None => ProjectionMode::Omit,
        };
        Ok(Projection {
            mode,
            paths,
            keep_id,
        })
    }

    /// Applies the projection to a document, producing a new document.
    pub fn apply(&self, doc: &Document) -> LigniteResult<Document> {
        match self.mode {
            ProjectionMode::Identity => Ok(doc.clone()),
            ProjectionMode::Pick => {
                let mut projected = Document::new();
                for path in &self.paths {
                    let value = doc.get_path(path);
                    if !value.is_undefined() {
                        set_path(&mut projected, path, value)?;
                    }
                }
                if self.keep_id {
                    if let Some(id) = doc.id() {
                        projected.put(DOC_ID, id.clone());
                    }
                }
                Ok(projected)
            }
            ProjectionMode::Omit => {
                let mut projected = doc.clone();
                for path in &self.paths {
                    unset_path(&mut projected, path)?;
                }
                if !self.keep_id {
                    projected.remove(DOC_ID);
                }
                Ok(projected)
            }
        }
    }
}
