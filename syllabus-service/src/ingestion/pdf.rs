//! PDF page text extraction.

use pdfium_render::prelude::*;
use tracing::{debug, warn};

use crate::error::ExtractionError;

/// Bind to the PDFium library, trying local paths before the system library.
pub fn create_pdfium() -> Result<Pdfium, ExtractionError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ExtractionError::Pdf {
            message: format!("Failed to load PDFium library: {:?}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Extract the text of every page, in page order. Pages without text yield an empty string
/// so page numbers stay aligned with the source.
pub fn extract_page_texts(bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
    let pdfium = create_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ExtractionError::Pdf {
            message: format!("Failed to load PDF: {:?}", e),
        })?;

    let mut pages = Vec::with_capacity(document.pages().len() as usize);
    for (index, page) in document.pages().iter().enumerate() {
        match page.text() {
            Ok(text) => pages.push(text.all().trim().to_string()),
            Err(e) => {
                warn!(page = index + 1, error = ?e, "Failed to get text for page");
                pages.push(String::new());
            }
        }
    }

    debug!(pages = pages.len(), "PDF text extracted");
    Ok(pages)
}
