use serde::Deserialize;

use crate::manifest::Manifest;
use crate::visibility::Span;

/// How page images are sized inside their column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingMode {
    /// Scale to the column width, keeping the native aspect ratio.
    #[default]
    Width,
    /// Native pixel size.
    Original,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOptions {
    pub columns: usize,
    pub content_width: f32,
    pub reading_mode: ReadingMode,
}

/// Space reserved for every asset before any content has loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    spans: Vec<Span>,
    total_height: f32,
}

impl Layout {
    /// Lay the manifest out in rows of `columns` cells.
    ///
    /// A row is as tall as its tallest cell and every group starts on a new
    /// row.
    pub fn compute(manifest: &Manifest, opts: &LayoutOptions) -> Self {
        let columns = opts.columns.max(1);
        let cell_width = opts.content_width.max(1.0) / columns as f32;
        let mut spans = Vec::with_capacity(manifest.len());
        let mut top = 0.0_f32;

        for group in manifest.groups() {
            let entries = &manifest.entries()[group.range];
            for row in entries.chunks(columns) {
                let row_height = row
                    .iter()
                    .map(|e| cell_height(e.width, e.height, cell_width, opts.reading_mode))
                    .fold(0.0_f32, f32::max);
                for entry in row {
                    let h = cell_height(entry.width, entry.height, cell_width, opts.reading_mode);
                    spans.push(Span::new(top, h));
                }
                top += row_height;
            }
        }

        Self {
            spans,
            total_height: top,
        }
    }

    pub fn span(&self, index: usize) -> Option<Span> {
        self.spans.get(index).copied()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn total_height(&self) -> f32 {
        self.total_height
    }
}

fn cell_height(width: u32, height: u32, cell_width: f32, mode: ReadingMode) -> f32 {
    match mode {
        ReadingMode::Width => {
            let ratio = height as f32 / width.max(1) as f32;
            cell_width * ratio
        }
        ReadingMode::Original => height as f32,
    }
}
