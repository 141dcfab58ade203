use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::compiler::{CommandCompiler, CompiledCommand};
use crate::config::Config;
use crate::dataset::{DatasetRow, DatasetSink, SourceInfo};
use crate::error::{Outcome, Result, PertitleError};
use crate::ladder::BitrateLadder;
use crate::media::{output_path, InvocationRunner, MediaCommandBuilder, ProcessExecutor};
use crate::metadata::{reparse, MediaProbe, MetadataExtractor};
use crate::quality::QualityScorer;

/// A source video found under `<source_dir>/<genre>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVideo {
    pub path: PathBuf,
    pub genre: String,
}

impl SourceVideo {
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            name: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            content_type: self.genre.clone(),
        }
    }
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Compiled commands scheduled
    pub commands: usize,
    /// Commands whose encode succeeded
    pub encoded: usize,
    /// Commands that could not be encoded, skipped without a row
    pub failed: usize,
    /// Rows handed to the dataset sink
    pub rows: usize,
    /// Rows with at least one degraded measurement
    pub degraded: usize,
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, other: Self) {
        self.commands += other.commands;
        self.encoded += other.encoded;
        self.failed += other.failed;
        self.rows += other.rows;
        self.degraded += other.degraded;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} command(s): {} encoded, {} failed, {} row(s) written ({} degraded)",
            self.commands, self.encoded, self.failed, self.rows, self.degraded
        )
    }
}

/// External-tool components sharing one executor
#[derive(Clone)]
pub struct Toolchain {
    pub runner: Arc<InvocationRunner>,
    pub extractor: Arc<MetadataExtractor>,
    pub scorer: Arc<QualityScorer>,
}

impl Toolchain {
    pub fn new(config: &Config, executor: Arc<dyn ProcessExecutor>) -> Self {
        let builder = MediaCommandBuilder::new(&config.tools.ffmpeg_path, &config.tools.ffprobe_path);
        let runner = Arc::new(InvocationRunner::new(
            executor.clone(),
            builder.clone(),
            config.encode_timeout(),
        ));
        let extractor = Arc::new(MetadataExtractor::new(
            executor.clone(),
            builder.clone(),
            config.probe_timeout(),
        ));
        let scorer = Arc::new(QualityScorer::new(
            executor,
            builder,
            extractor.clone(),
            config.quality.clone(),
            config.encode_timeout(),
        ));

        Self {
            runner,
            extractor,
            scorer,
        }
    }
}

/// Ladder from the config file, overridden by `<FAMILY>_<CLASS>_BITRATES`
/// environment variables for catalog and config families.
pub fn load_ladder(config: &Config, catalog: &dyn Catalog) -> BitrateLadder {
    let mut ladder = BitrateLadder::from_raw(&config.ladder);
    let families: Vec<String> = catalog
        .codec_families()
        .into_iter()
        .chain(config.ladder.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    ladder.overlay_env(&families, |name| std::env::var(name).ok());
    ladder
}

/// Source videos one directory level below `source_dir`, sorted by path.
pub fn discover_sources(source_dir: &Path, extensions: &[String]) -> Result<Vec<SourceVideo>> {
    if !source_dir.is_dir() {
        return Err(PertitleError::FileNotFound(source_dir.display().to_string()));
    }

    let mut sources: Vec<SourceVideo> = WalkDir::new(source_dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
                })
        })
        .filter_map(|entry| {
            let genre = entry.path().parent()?.file_name()?.to_string_lossy().into_owned();
            Some(SourceVideo {
                path: entry.into_path(),
                genre,
            })
        })
        .collect();

    sources.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(sources)
}

/// One (video, codec, profile) unit of work
struct Job {
    source: SourceVideo,
    source_probe: Outcome<MediaProbe>,
    commands: Vec<CompiledCommand>,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    catalog: Arc<dyn Catalog>,
    compiler: Arc<CommandCompiler>,
    tools: Toolchain,
    sink: Arc<dyn DatasetSink>,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(
        config: Config,
        catalog: Arc<dyn Catalog>,
        sink: Arc<dyn DatasetSink>,
        tools: Toolchain,
    ) -> Self {
        let compiler = Arc::new(CommandCompiler::new(load_ladder(&config, catalog.as_ref())));
        Self {
            config: Arc::new(config),
            catalog,
            compiler,
            tools,
            sink,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn compiler(&self) -> &CommandCompiler {
        &self.compiler
    }

    /// Encode every source with every active profile and record the results.
    pub async fn run(&self) -> Result<RunSummary> {
        let families = self.catalog.codec_families();
        if families.is_empty() {
            warn!("No active codecs found");
            return Ok(RunSummary::default());
        }

        let sources = discover_sources(
            &self.config.paths.source_dir,
            &self.config.pipeline.source_extensions,
        )?;
        info!("Found {} source video(s)", sources.len());

        let jobs = self.plan(&sources, &families).await;
        let total: usize = jobs.iter().map(|job| job.commands.len()).sum();
        info!("Scheduled {} encode(s) across {} job(s)", total, jobs.len());

        let progress = self.progress_bar(total as u64);
        let permits = Arc::new(Semaphore::new(self.config.pipeline.jobs.max(1)));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let pipeline = self.clone();
            let permits = permits.clone();
            let progress = progress.clone();
            let span = info_span!(
                "job",
                source = %job.source.path.display(),
                codec = %job.commands[0].codec,
                profile = %job.commands[0].profile,
            );

            tasks.spawn(
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| PertitleError::Execution(e.to_string()))?;
                    pipeline.process_job(job, &progress).await
                }
                .instrument(span),
            );
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(job_summary)) => summary += job_summary,
                Ok(Err(e)) => {
                    tasks.abort_all();
                    progress.abandon();
                    return Err(e);
                }
                Err(e) => warn!("Encoding job panicked or was cancelled: {}", e),
            }
        }

        progress.finish_with_message("done");
        info!("Encoding process completed: {}", summary);
        Ok(summary)
    }

    /// Compile every profile for every source; sources are probed once.
    async fn plan(&self, sources: &[SourceVideo], families: &[String]) -> Vec<Job> {
        let mut jobs = Vec::new();

        for source in sources {
            let mut source_probe = None;

            for family in families {
                for profile in self.catalog.profile_names(family) {
                    let params = self.catalog.profile_params(family, &profile);
                    let commands = self.compiler.compile_profile(family, &profile, &params);
                    if commands.is_empty() {
                        debug!("Nothing to encode for {}/{}", family, profile);
                        continue;
                    }

                    if source_probe.is_none() {
                        source_probe = Some(self.tools.extractor.probe(&source.path, "source").await);
                    }

                    jobs.push(Job {
                        source: source.clone(),
                        source_probe: source_probe.clone().unwrap_or_else(|| Outcome::Ok(MediaProbe::unknown())),
                        commands,
                    });
                }
            }
        }

        jobs
    }

    async fn process_job(&self, job: Job, progress: &ProgressBar) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for compiled in &job.commands {
            progress.set_message(format!("{}/{}", job.source.genre, compiled));
            summary += self.process_command(&job.source, &job.source_probe, compiled).await?;
            progress.inc(1);
        }

        Ok(summary)
    }

    /// Encode, measure and record one compiled command.
    pub async fn process_command(
        &self,
        source: &SourceVideo,
        source_probe: &Outcome<MediaProbe>,
        compiled: &CompiledCommand,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            commands: 1,
            ..RunSummary::default()
        };

        let output_dir = self.config.paths.encoded_dir.join(&source.genre);
        if let Err(e) = fs::create_dir_all(&output_dir).await {
            warn!("Cannot create {} for {}: {}", output_dir.display(), compiled, e);
            summary.failed = 1;
            return Ok(summary);
        }
        let output = output_path(
            &output_dir,
            &source.path,
            compiled,
            &self.config.pipeline.default_extension,
        );

        info!("Encoding {}", compiled);
        let command = self.tools.runner.encode_command(&source.path, compiled, &output);
        let report = self.tools.runner.run(&command).await;
        if !report.success {
            warn!("Failed to encode {}", compiled);
            summary.failed = 1;
            return Ok(summary);
        }
        summary.encoded = 1;

        let encode = reparse(&compiled.argument_string());
        let output_probe = self
            .tools
            .extractor
            .probe_with_retry(&output, &self.config.retry)
            .await;

        let score = if self.config.quality.enabled {
            self.tools.scorer.score(&source.path, &output).await
        } else {
            Outcome::Ok(None)
        };

        let degraded = source_probe.is_degraded() || output_probe.is_degraded() || score.is_degraded();
        match score.value() {
            Some(vmaf) => info!("VMAF score for {}: {}", compiled, vmaf),
            None => info!("VMAF score for {}: N/A", compiled),
        }

        let row = DatasetRow::assemble(
            &source.info(),
            source_probe.value(),
            &encode,
            output_probe.value(),
            score.into_value(),
        );
        self.sink.append(row).await?;

        summary.rows = 1;
        summary.degraded = usize::from(degraded);
        Ok(summary)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar
    }
}
