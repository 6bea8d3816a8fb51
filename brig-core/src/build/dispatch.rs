//! Build dispatch: validation, per-backend request normalization and the
//! concurrent solve fan-out.

use super::hosts::to_buildkit_extra_hosts;
use super::inputs::{load_inputs, InputsRelease, SpooledStream};
use super::loader::{ImageStore, LoadWriter};
use super::reference::validate_tag;
use super::resolve::{resolve_drivers, DriverPair};
use super::{Inputs, Options};
use crate::driver::{
    filter_available, BuildClient, CacheOptionsEntry, DriverInfo, ExportEntry, ExportOutput,
    Feature, SolveRequest, SolveResponse,
};
use crate::error::{BrigError, Result};
use crate::observability::metrics::record_build;
use crate::progress::ProgressWriter;
use crate::util::{parse_bool, TaskGroup};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const FRONTEND: &str = "dockerfile.v0";
const INLINE_CACHE_ARG: &str = "BUILDKIT_INLINE_CACHE";

/// State shared by the solve tasks of one dispatch.
#[derive(Default)]
struct Aggregate {
    responses: HashMap<String, SolveResponse>,
    exports_warned: bool,
}

/// One backend's share of a build, ready to submit.
struct PreparedSolve {
    name: String,
    driver: String,
    client: Arc<dyn BuildClient>,
    request: SolveRequest,
    progress: ProgressWriter,
    image_id_file: Option<PathBuf>,
}

/// Runs named builds across a set of backends.
#[derive(Clone, Default)]
pub struct Dispatcher {
    image_store: Option<Arc<dyn ImageStore>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image store receiving `docker` exports without an explicit output.
    pub fn with_image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.image_store = Some(store);
        self
    }

    /// Cancelling `token` aborts every in-flight boot and solve.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build every request in `opts` and return the responses by request name.
    ///
    /// Either every build succeeds and all responses are returned, or the
    /// first failure is returned and the other builds are cancelled.
    #[instrument(skip_all, fields(requests = opts.len()))]
    pub async fn dispatch(
        &self,
        drivers: &[DriverInfo],
        opts: HashMap<String, Options>,
        progress: ProgressWriter,
    ) -> Result<HashMap<String, SolveResponse>> {
        if drivers.is_empty() {
            return Err(BrigError::NoDriverConfigured);
        }
        let drivers = filter_available(drivers)?;

        let mut names: Vec<&String> = opts.keys().collect();
        names.sort();
        for name in &names {
            validate(name, &opts[*name])?;
        }

        let resolution = resolve_drivers(&drivers, &opts, &progress, &self.cancel, |pairs| {
            self.check_assignment(&drivers, &opts, pairs)
        })
        .await?;

        let multi_driver = resolution.driver_indexes().len() > 1;
        let multi_target = opts.len() > 1;
        let with_prefix = multi_driver || multi_target;

        let aggregate = Arc::new(Mutex::new(Aggregate::default()));
        // Held until dispatch returns; dropping deletes temporary contexts.
        let mut releases: Vec<InputsRelease> = Vec::new();
        let mut prepared = Vec::new();

        for name in &names {
            let opt = &opts[*name];
            let pairs = resolution.pairs.get(*name).map(Vec::as_slice).unwrap_or_default();
            let spool = if pairs.len() > 1 && SpooledStream::needed(&opt.inputs) {
                Some(SpooledStream::capture(&opt.inputs).await?)
            } else {
                None
            };
            for pair in pairs {
                let di = &drivers[pair.driver_index];
                let prefix = match (multi_driver, multi_target) {
                    (true, true) => format!("{} {}", name, di.name),
                    (true, false) => di.name.clone(),
                    _ => name.to_string(),
                };
                let pw = progress.with_prefix(prefix, with_prefix);

                let inputs = match &spool {
                    Some(spool) => spool.replay(&opt.inputs).await?,
                    None => opt.inputs.clone(),
                };
                let (request, release) =
                    self.prepare(opt, &inputs, di, pair, &progress, &aggregate).await?;
                releases.push(release);

                if let Some(path) = &opt.image_id_file {
                    remove_stale(path).await?;
                }

                prepared.push(PreparedSolve {
                    name: name.to_string(),
                    driver: di.factory_name().to_string(),
                    client: resolution.client(pair.driver_index)?,
                    request,
                    progress: pw,
                    image_id_file: opt.image_id_file.clone(),
                });
            }
            if let Some(spool) = spool {
                releases.push(spool.into_release());
            }
        }

        let mut group = TaskGroup::new(&self.cancel);
        for solve in prepared {
            let aggregate = aggregate.clone();
            group.spawn(run_solve(solve, aggregate));
        }
        group.wait().await?;

        let responses = std::mem::take(&mut aggregate.lock().responses);
        info!(builds = responses.len(), "Dispatch complete");
        Ok(responses)
    }

    /// Capability checks for an assignment, run before any backend is booted.
    fn check_assignment(
        &self,
        drivers: &[DriverInfo],
        opts: &HashMap<String, Options>,
        pairs: &HashMap<String, Vec<DriverPair>>,
    ) -> Result<()> {
        for (name, opt) in opts {
            for pair in pairs.get(name).map(Vec::as_slice).unwrap_or_default() {
                let di = &drivers[pair.driver_index];
                let features = di.features();

                let inline_only = opt.cache_to.iter().all(|e| e.kind == "inline");
                if !inline_only && !features.cache_export {
                    return Err(di.not_supported(Feature::CacheExport));
                }

                for e in &opt.exports {
                    match e.kind.as_str() {
                        "oci" if !features.oci_exporter => {
                            return Err(di.not_supported(Feature::OciExporter))
                        }
                        "docker" if e.output.is_none() && di.default_local => {}
                        "docker" if !features.docker_exporter => {
                            return Err(di.not_supported(Feature::DockerExporter))
                        }
                        "docker" if e.output.is_none() && self.image_store.is_none() => {
                            return Err(BrigError::NoImageStore)
                        }
                        _ => {}
                    }
                    let is_image = matches!(e.kind.as_str(), "image" | "docker");
                    if is_image && di.default_local && truthy(e.attrs.get("push")) {
                        let driver = di.factory_name().to_string();
                        return Err(BrigError::DefaultDriverPush { driver });
                    }
                }

                if pair.platforms.len() > 1 && !features.multi_platform {
                    return Err(di.not_supported(Feature::MultiPlatform));
                }
            }
        }
        Ok(())
    }

    /// Normalize one backend's copy of a request into a solve request.
    async fn prepare(
        &self,
        opt: &Options,
        inputs: &Inputs,
        di: &DriverInfo,
        pair: &DriverPair,
        base: &ProgressWriter,
        aggregate: &Mutex<Aggregate>,
    ) -> Result<(SolveRequest, InputsRelease)> {
        let mut cache_exports = opt.cache_to.clone();
        if opt.build_args.get(INLINE_CACHE_ARG).and_then(|v| parse_bool(v)) == Some(true) {
            cache_exports.push(CacheOptionsEntry::new("inline"));
        }

        let mut exports = opt.exports.clone();
        if exports.is_empty() {
            if di.default_local {
                exports.push(ExportEntry::new("image"));
            } else {
                let mut agg = aggregate.lock();
                if !agg.exports_warned {
                    agg.exports_warned = true;
                    warn!(
                        driver = %di.factory_name(),
                        "No output specified; the build result will only remain in the build cache"
                    );
                }
            }
        }

        if !opt.tags.is_empty() {
            let names = opt
                .tags
                .iter()
                .map(|t| validate_tag(t))
                .collect::<Result<Vec<_>>>()?
                .join(",");
            for e in exports.iter_mut() {
                if matches!(e.kind.as_str(), "image" | "oci" | "docker") {
                    e.attrs.insert("name".to_string(), names.clone());
                }
            }
        }

        for e in exports.iter_mut() {
            if e.kind == "docker" && e.output.is_none() {
                if di.default_local {
                    e.kind = "image".to_string();
                } else {
                    let store = self.image_store.clone().ok_or(BrigError::NoImageStore)?;
                    e.output = Some(ExportOutput::new(LoadWriter::new(store, base.clone())));
                }
            }
            if e.kind == "image" && di.default_local {
                e.kind = "moby".to_string();
            }
        }

        let mut request = SolveRequest {
            frontend: FRONTEND.to_string(),
            exports,
            cache_exports,
            cache_imports: opt.cache_from.clone(),
            session: opt.session.clone(),
            ..Default::default()
        };

        let release = load_inputs(inputs, &mut request).await?;

        let attrs = &mut request.frontend_attrs;
        if opt.pull {
            attrs.insert("image-resolve-mode".to_string(), "pull".to_string());
        }
        if let Some(target) = opt.target.as_ref().filter(|t| !t.is_empty()) {
            attrs.insert("target".to_string(), target.clone());
        }
        if opt.no_cache {
            attrs.insert("no-cache".to_string(), String::new());
        }
        for (k, v) in &opt.build_args {
            attrs.insert(format!("build-arg:{}", k), v.clone());
        }
        for (k, v) in &opt.labels {
            attrs.insert(format!("label:{}", k), v.clone());
        }
        if !pair.platforms.is_empty() {
            let platforms: Vec<String> = pair.platforms.iter().map(|p| p.format()).collect();
            attrs.insert("platform".to_string(), platforms.join(","));
        }
        if matches!(opt.network_mode.as_str(), "host" | "none") {
            attrs.insert("force-network-mode".to_string(), opt.network_mode.clone());
        }
        attrs.insert("add-hosts".to_string(), to_buildkit_extra_hosts(&opt.extra_hosts)?);

        debug!(driver = %di.name, attrs = ?request.frontend_attrs, "Prepared solve request");
        Ok((request, release))
    }
}

async fn run_solve(solve: PreparedSolve, aggregate: Arc<Mutex<Aggregate>>) -> Result<()> {
    let PreparedSolve { name, driver, client, request, progress, image_id_file } = solve;

    let (status, forward) = progress.status_channel();
    let result = client.solve(request, status).await;
    if forward.await.is_err() {
        debug!(build = %name, "Progress relay ended abnormally");
    }

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            record_build(&driver, false);
            return Err(e.wrap(format!("building {:?}", name)));
        }
    };
    record_build(&driver, true);

    if let Some(path) = image_id_file {
        let digest = response.image_digest().unwrap_or_default().to_string();
        tokio::fs::write(&path, digest)
            .await
            .map_err(|e| BrigError::IoError { path: path.clone(), source: e })?;
    }

    aggregate.lock().responses.insert(name, response);
    Ok(())
}

async fn remove_stale(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BrigError::IoError { path: path.to_path_buf(), source: e }
            .wrap("removing image ID file")),
    }
}

fn truthy(value: Option<&String>) -> bool {
    value.and_then(|v| parse_bool(v)).unwrap_or(false)
}

/// Checks that need nothing but the request itself.
fn validate(name: &str, opt: &Options) -> Result<()> {
    if opt.exports.len() > 1 {
        return Err(BrigError::MultipleExports { target: name.to_string() });
    }

    if opt.image_id_file.is_some() {
        let mut distinct: Vec<String> =
            opt.platforms.iter().map(|p| p.normalize().format()).collect();
        distinct.sort();
        distinct.dedup();
        if distinct.len() > 1 {
            return Err(BrigError::ImageIdFileMultiPlatform);
        }
        if opt.exports.iter().any(|e| e.kind == "local" || e.kind == "tar") {
            return Err(BrigError::ImageIdFileExporter);
        }
    }

    match opt.network_mode.as_str() {
        "" | "default" | "host" | "none" => {}
        other => return Err(BrigError::UnsupportedNetworkMode { mode: other.to_string() }),
    }

    if opt.tags.is_empty() {
        let anonymous_push = opt.exports.iter().any(|e| {
            e.kind == "image"
                && e.attrs.get("name").map_or(true, |n| n.is_empty())
                && truthy(e.attrs.get("push"))
        });
        if anonymous_push {
            return Err(BrigError::PushWithoutTag);
        }
    } else {
        for tag in &opt.tags {
            validate_tag(tag)?;
        }
    }

    to_buildkit_extra_hosts(&opt.extra_hosts)?;
    Ok(())
}
