//! Span-based text rewriting
//!
//! Rewrites are recorded against byte offsets of the code that was parsed
//! and applied in one pass. Edits must not overlap; an edit that starts
//! inside an earlier one is dropped, so removing a whole statement also
//! discards any finer edit recorded inside it. Zero-width edits are
//! insertions and sort before a replacement starting at the same offset.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEdit {
    pub start: u32,
    pub end: u32,
    pub replacement: String,
}

#[derive(Debug, Clone, Default)]
pub struct SourceEdits {
    edits: Vec<SourceEdit>,
}

impl SourceEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, start: u32, end: u32, replacement: impl Into<String>) {
        self.edits.push(SourceEdit {
            start,
            end,
            replacement: replacement.into(),
        });
    }

    pub fn insert(&mut self, at: u32, text: impl Into<String>) {
        self.replace(at, at, text);
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Apply every edit to `code`
    pub fn apply(&mut self, code: &str) -> String {
        self.apply_range(code, 0, code.len() as u32)
    }

    /// Render `code[start..end]` with the edits that fall inside it
    pub fn apply_range(&mut self, code: &str, start: u32, end: u32) -> String {
        self.edits.sort_by_key(|edit| (edit.start, edit.end));

        let (start, end) = (start as usize, (end as usize).min(code.len()));
        let mut rendered = String::with_capacity(end.saturating_sub(start));
        let mut cursor = start;
        for edit in &self.edits {
            let (edit_start, edit_end) = (edit.start as usize, edit.end as usize);
            if edit_start < cursor || edit_end > end {
                continue;
            }
            rendered.push_str(&code[cursor..edit_start]);
            rendered.push_str(&edit.replacement);
            cursor = edit_end;
        }
        if cursor < end {
            rendered.push_str(&code[cursor..end]);
        }
        rendered
    }
}
