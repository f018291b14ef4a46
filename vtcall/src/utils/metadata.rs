use std::path::PathBuf;

pub type Span = std::ops::Range<usize>;

/// A byte range in a schema source together with the file it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub span: Span,
    pub path: PathBuf,
}
impl Location {
    pub fn new(span: Span, path: PathBuf) -> Self {
        Self { span, path }
    }
}

