use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use ariadne::{ColorGenerator, Label, Report, ReportKind, Source};

use super::metadata::Location;

/// An error that points into a schema source.
pub trait ReportableError: std::error::Error {
    /// Headline of the report.
    fn get_message(&self) -> String {
        self.to_string()
    }
    /// Positions in the source, each with its own note. The first label
    /// anchors the report.
    fn get_labels(&self) -> Vec<(Location, String)>;
}

struct FileCache {
    pub storage: HashMap<PathBuf, ariadne::Source<String>>,
}

impl ariadne::Cache<PathBuf> for FileCache {
    type Storage = String;

    fn fetch(&mut self, id: &PathBuf) -> Result<&Source<Self::Storage>, impl std::fmt::Debug> {
        self.storage
            .get(id)
            .ok_or_else(|| format!("File not found: {}", id.display()))
    }

    fn display<'a>(&self, id: &'a PathBuf) -> Option<impl std::fmt::Display + 'a> {
        Some(id.display())
    }
}

static FILE_BUCKET: LazyLock<Mutex<FileCache>> = LazyLock::new(|| {
    Mutex::new(FileCache {
        storage: HashMap::new(),
    })
});

/// Print errors against `src` to stderr.
pub fn report(src: &str, path: PathBuf, errs: &[Box<dyn ReportableError + '_>]) {
    let mut colors = ColorGenerator::new();
    for e in errs {
        let rawlabels = e.get_labels();
        let Some((anchor, _)) = rawlabels.first() else {
            log::error!("{}", e.get_message());
            continue;
        };
        let span = (path.clone(), anchor.span.clone());
        let labels = rawlabels.iter().map(|(loc, message)| {
            let span = (path.clone(), loc.span.clone());
            Label::new(span)
                .with_message(message)
                .with_color(colors.next())
        });
        let builder = Report::build(ReportKind::Error, span)
            .with_message(e.get_message())
            .with_labels(labels)
            .finish();
        if let Ok(mut cache) = FILE_BUCKET.lock() {
            let cache: &mut FileCache = &mut cache;
            cache
                .storage
                .insert(path.clone(), Source::from(src.to_string()));
            if let Err(err) = builder.eprint(cache) {
                log::error!("failed to print report: {err}");
            }
        }
    }
}

pub fn dump_to_string(errs: &[Box<dyn ReportableError>]) -> String {
    let mut res = String::new();
    for e in errs {
        res += e.get_message().as_str();
        res.push('\n');
    }
    res
}
