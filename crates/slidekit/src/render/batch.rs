//! One-shot `soffice --convert-to svg` rendering of a whole document.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info_span, warn};

use crate::error::RenderError;

use super::{slide_file_name, RenderStrategy};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_STDERR_CHARS: usize = 2000;

pub struct BatchRenderer {
    soffice_path: PathBuf,
    timeout: Duration,
}

impl BatchRenderer {
    pub fn new<P: AsRef<Path>>(soffice_path: P, timeout: Duration) -> Self {
        Self {
            soffice_path: soffice_path.as_ref().to_path_buf(),
            timeout,
        }
    }

    fn command(&self, source: &Path, raw_dir: &Path, profile_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.soffice_path);
        cmd.arg(format!(
            "-env:UserInstallation=file://{}",
            profile_dir.display()
        ))
        .args([
            "--headless",
            "--invisible",
            "--nodefault",
            "--norestore",
            "--convert-to",
            "svg:impress_svg_Export",
            "--outdir",
        ])
        .arg(raw_dir)
        .arg(source)
        .stdin(Stdio::null())
        .stdout(Stdio::null());
        cmd
    }

    /// Runs the converter and waits for it, killing it at the deadline.
    fn run(&self, mut cmd: Command, stderr_path: &Path) -> Result<(), RenderError> {
        let stderr = File::create(stderr_path).map_err(io_error(stderr_path))?;
        let mut child = cmd
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| RenderError::EngineUnavailable(format!(
                "{}: {}",
                self.soffice_path.display(),
                e
            )))?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait().map_err(io_error(&self.soffice_path))? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    warn!("soffice exceeded {:?}, killing it", self.timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RenderError::Timeout {
                        secs: self.timeout.as_secs(),
                    });
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };

        if status.success() {
            return Ok(());
        }
        let stderr = std::fs::read_to_string(stderr_path).unwrap_or_default();
        Err(RenderError::BatchFailed {
            code: status.code(),
            stderr: stderr.chars().take(MAX_STDERR_CHARS).collect(),
        })
    }
}

impl RenderStrategy for BatchRenderer {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn render(
        &self,
        source: &Path,
        slide_count: usize,
        out_dir: &Path,
    ) -> Result<BTreeMap<u32, PathBuf>, RenderError> {
        let _span = info_span!("render.batch", slides = slide_count).entered();

        let raw_dir = out_dir.join("raw");
        let profile_dir = out_dir.join("profile");
        for dir in [&raw_dir, &profile_dir] {
            std::fs::create_dir_all(dir).map_err(|source| RenderError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let started = Instant::now();
        self.run(
            self.command(source, &raw_dir, &profile_dir),
            &out_dir.join("soffice.stderr"),
        )?;
        debug!("soffice finished in {:?}", started.elapsed());

        let produced = collect_svgs(&raw_dir)?;
        if produced.len() != slide_count {
            warn!(
                "soffice produced {} SVG files for {} slides",
                produced.len(),
                slide_count
            );
        }

        let mut images = BTreeMap::new();
        for (index, file) in produced.into_iter().take(slide_count).enumerate() {
            let slide_number = index as u32 + 1;
            let target = out_dir.join(slide_file_name(slide_number));
            std::fs::rename(&file, &target).map_err(|source| RenderError::Io {
                path: file.clone(),
                source,
            })?;
            images.insert(slide_number, target);
        }
        Ok(images)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RenderError {
    let path = path.to_path_buf();
    move |source| RenderError::Io { path, source }
}

/// Trailing decimal number of a file stem, e.g. `deck12` -> 12.
fn trailing_number(stem: &str) -> Option<u64> {
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// SVG files of a directory in slide order.
///
/// When every file name ends in a number the files are ordered numerically,
/// otherwise by name.
fn collect_svgs(dir: &Path) -> Result<Vec<PathBuf>, RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|source| RenderError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("svg"))
        })
        .collect();

    let numbered: Option<Vec<u64>> = files
        .iter()
        .map(|p| p.file_stem().and_then(|s| s.to_str()).and_then(trailing_number))
        .collect();

    match numbered {
        Some(_) => files.sort_by_key(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .and_then(trailing_number)
                .unwrap_or(0)
        }),
        None => files.sort(),
    }
    Ok(files)
}
