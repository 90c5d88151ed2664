//! Recording fakes for the collaborator traits, used by unit tests.

use crate::extract::{ExtractResult, Extractor};
use crate::fetch::{Downloader, FetchError, FetchResult, file_name_from_url};
use crate::runner::{CommandRunner, CommandSpec, ExecutionError, ExecutionResult};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

type Predicate = Box<dyn Fn(&CommandSpec) -> bool>;
type Hook = Box<dyn Fn(&CommandSpec)>;

/// Records every command instead of running it.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    runs: RefCell<Vec<CommandSpec>>,
    captures: RefCell<Vec<CommandSpec>>,
    capture_output: String,
    fail_when: Option<Predicate>,
    on_run: Option<Hook>,
}

impl RecordingRunner {
    /// Fail `run` with exit code 2 for every spec matching `pred`.
    pub(crate) fn failing_on(pred: impl Fn(&CommandSpec) -> bool + 'static) -> Self {
        Self {
            fail_when: Some(Box::new(pred)),
            ..Self::default()
        }
    }

    /// Answer every `capture` with `output`.
    pub(crate) fn with_capture_output(output: &str) -> Self {
        Self {
            capture_output: output.to_string(),
            ..Self::default()
        }
    }

    /// Call `hook` for every `run`.
    pub(crate) fn on_run(hook: impl Fn(&CommandSpec) + 'static) -> Self {
        Self {
            on_run: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    pub(crate) fn specs(&self) -> Vec<CommandSpec> {
        self.runs.borrow().clone()
    }

    pub(crate) fn argvs(&self) -> Vec<Vec<String>> {
        self.runs.borrow().iter().map(|s| s.argv.clone()).collect()
    }

    pub(crate) fn captured(&self) -> Vec<CommandSpec> {
        self.captures.borrow().clone()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.runs.borrow().len() + self.captures.borrow().len()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> ExecutionResult<()> {
        self.runs.borrow_mut().push(spec.clone());
        if let Some(hook) = &self.on_run {
            hook(spec);
        }
        match &self.fail_when {
            Some(pred) if pred(spec) => Err(ExecutionError::NonZeroExit {
                command: spec.command_line(),
                code: 2,
            }),
            _ => Ok(()),
        }
    }

    fn capture(&self, spec: &CommandSpec) -> ExecutionResult<String> {
        self.captures.borrow_mut().push(spec.clone());
        Ok(self.capture_output.clone())
    }
}

/// Writes a placeholder file for the first URL.
#[derive(Default)]
pub(crate) struct FakeDownloader {
    requests: RefCell<Vec<Vec<String>>>,
}

impl FakeDownloader {
    pub(crate) fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Downloader for FakeDownloader {
    fn fetch(&self, urls: &[String], dest_dir: &Path) -> FetchResult<PathBuf> {
        self.requests.borrow_mut().push(urls.to_vec());
        let url = urls.first().ok_or(FetchError::NoUrls)?;
        fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(file_name_from_url(url)?);
        fs::write(&path, b"fake archive")?;
        Ok(path)
    }
}

/// Creates `<dest>/<archive stem>/` holding the configured files.
pub(crate) struct FakeExtractor {
    files: Vec<&'static str>,
    extractions: RefCell<Vec<(PathBuf, PathBuf)>>,
}

impl Default for FakeExtractor {
    fn default() -> Self {
        Self::with_files(&["configure"])
    }
}

impl FakeExtractor {
    pub(crate) fn with_files(files: &[&'static str]) -> Self {
        Self {
            files: files.to_vec(),
            extractions: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.extractions.borrow().len()
    }

    pub(crate) fn destinations(&self) -> Vec<PathBuf> {
        self.extractions.borrow().iter().map(|(_, d)| d.clone()).collect()
    }
}

/// Archive file name without its archive suffixes.
pub(crate) fn archive_stem(archive: &Path) -> String {
    const SUFFIXES: [&str; 8] = [
        ".pkg.tar.zst",
        ".tar.gz",
        ".tar.bz2",
        ".tar.xz",
        ".tar.zst",
        ".tgz",
        ".tar",
        ".zip",
    ];
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in SUFFIXES {
        if let Some(stem) = name.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    name
}

impl Extractor for FakeExtractor {
    fn extract(&self, archive: &Path, dest_dir: &Path) -> ExtractResult<PathBuf> {
        self.extractions
            .borrow_mut()
            .push((archive.to_path_buf(), dest_dir.to_path_buf()));
        let root = dest_dir.join(archive_stem(archive));
        fs::create_dir_all(&root)?;
        for file in &self.files {
            fs::write(root.join(file), b"")?;
        }
        Ok(root)
    }
}
