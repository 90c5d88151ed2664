//! Shared fakes for the orchestrator integration tests

#![allow(dead_code)]

use convenient_rootfs::extract::ExtractResult;
use convenient_rootfs::fetch::{FetchResult, Transport, file_name_from_url};
use convenient_rootfs::{
    CommandRunner, CommandSpec, Downloader, ExecutionError, Extractor, FetchError,
    PackageDescriptor,
};
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

/// Records commands and fails the `make -jN` step of selected packages.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: RefCell<Vec<CommandSpec>>,
    pub fail_build_of: Vec<String>,
}

impl FakeRunner {
    pub fn failing_build_of(names: &[&str]) -> Self {
        Self {
            fail_build_of: names.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls.borrow().iter().map(|s| s.argv.clone()).collect()
    }

    /// Package name of each recorded call, taken from the `<name>: <step>` label.
    pub fn packages(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|s| s.description.split(':').next().map(ToString::to_string))
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<(), ExecutionError> {
        self.calls.borrow_mut().push(spec.clone());
        let is_build = spec.argv.iter().any(|a| a.starts_with("-j"));
        let failing = self
            .fail_build_of
            .iter()
            .any(|name| spec.description.starts_with(&format!("{name}:")));
        if is_build && failing {
            return Err(ExecutionError::NonZeroExit {
                command: spec.command_line(),
                code: 2,
            });
        }
        Ok(())
    }

    fn capture(&self, spec: &CommandSpec) -> Result<String, ExecutionError> {
        self.calls.borrow_mut().push(spec.clone());
        Ok(String::new())
    }
}

/// Counts downloads and writes a small placeholder file.
#[derive(Default)]
pub struct CountingTransport {
    pub requests: Cell<usize>,
}

impl Transport for CountingTransport {
    fn download(&self, _url: &str, dest: &Path) -> FetchResult<u64> {
        self.requests.set(self.requests.get() + 1);
        fs::write(dest, b"tarball")?;
        Ok(7)
    }
}

/// Creates `<dest>/<name>-<version>/configure` for `<name>-<version>.tar.gz`.
#[derive(Default)]
pub struct AutotoolsExtractor {
    pub calls: Cell<usize>,
}

impl Extractor for AutotoolsExtractor {
    fn extract(&self, archive: &Path, dest_dir: &Path) -> ExtractResult<PathBuf> {
        self.calls.set(self.calls.get() + 1);
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.trim_end_matches(".tar.gz");
        let root = dest_dir.join(stem);
        fs::create_dir_all(&root)?;
        fs::write(root.join("configure"), b"#!/bin/sh\n")?;
        Ok(root)
    }
}

/// Downloader that must never be reached.
#[derive(Default)]
pub struct CountingDownloader {
    pub calls: Cell<usize>,
}

impl Downloader for CountingDownloader {
    fn fetch(&self, urls: &[String], dest_dir: &Path) -> FetchResult<PathBuf> {
        self.calls.set(self.calls.get() + 1);
        let url = urls.first().ok_or(FetchError::NoUrls)?;
        Ok(dest_dir.join(file_name_from_url(url)?))
    }
}

/// Archive package `name` 1.0 with the given dependencies.
pub fn package(name: &str, deps: &[&str]) -> PackageDescriptor {
    let mut desc = PackageDescriptor::new(name, "1.0");
    desc.urls = vec![format!("https://mirror.example/{name}-1.0.tar.gz")];
    desc.deps = deps.iter().map(ToString::to_string).collect();
    desc
}
