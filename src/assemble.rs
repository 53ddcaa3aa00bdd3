//! Output page stream
//!
//! [`ConcatenationAssembler`] owns the output document for the whole job.
//! Pages land in exactly the order `append` is called; `finalize` consumes
//! the assembler, so the output is saved at most once.

use tracing::{debug, info};

use crate::encryption::SaveRequest;
use crate::error::{EngineError, OutputError, Result};
use crate::pdf::DocumentEngine;

/// Accumulates processed pages from successive entries
pub struct ConcatenationAssembler<'e, E: DocumentEngine> {
    engine: &'e E,
    output: E::Doc,
    pages: usize,
}

impl<'e, E: DocumentEngine> ConcatenationAssembler<'e, E> {
    /// Start an empty output document
    pub fn new(engine: &'e E) -> std::result::Result<Self, EngineError> {
        Ok(Self {
            engine,
            output: engine.new_document()?,
            pages: 0,
        })
    }

    /// Copy one page of `source`, as it is now, to the end of the output
    pub fn append(&mut self, source: &E::Doc, page: usize) -> std::result::Result<(), EngineError> {
        self.engine.insert_pages(&mut self.output, source, page, page)?;
        self.pages += 1;
        debug!(page = page + 1, total = self.pages, "Page appended");
        Ok(())
    }

    /// Pages appended so far
    pub fn page_count(&self) -> usize {
        self.pages
    }

    /// Save the output and release it, returning the number of pages written.
    ///
    /// With no pages nothing is written and [`OutputError::NoPages`] is
    /// returned.
    pub fn finalize(self, request: &SaveRequest) -> Result<usize> {
        let Self { engine, mut output, pages } = self;

        if pages == 0 {
            engine.close(output);
            return Err(OutputError::NoPages.into());
        }

        let saved = engine.save(&mut output, &request.path, request.encryption.as_ref());
        engine.close(output);
        saved?;

        info!(
            path = %request.path.display(),
            pages,
            encrypted = request.encryption.is_some(),
            "Output saved"
        );
        Ok(pages)
    }
}
