//! Operation: resolve the pack and write `modforge.lock`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use modforge_core::config::GlobalConfig;
use modforge_core::lockfile::{Lockfile, LOCK_FILE};
use modforge_core::pack::{Pack, PackRequirement, PACK_FILE};
use modforge_core::policy::{PolicySet, POLICY_FILE};
use modforge_core::tags::CompatTags;
use modforge_registry::{FetchFailure, RegistryQuery};
use modforge_resolver::policy::DecisionPrompt;
use modforge_resolver::{resolve as run_resolver, Resolution, ResolveOptions, RootSelection};
use modforge_util::errors::ModforgeError;
use modforge_util::progress;

use crate::RegistrySource;

/// Options for `modforge resolve`.
#[derive(Clone, Default)]
pub struct ResolveOpts {
    pub registry: RegistrySource,
    /// Answers `ask` rules; without one they fail the run.
    pub prompt: Option<Arc<dyn DecisionPrompt>>,
    /// Overrides `timeout-secs` from the global config.
    pub timeout: Option<Duration>,
    /// Overrides `max-concurrent-fetches` from the global config.
    pub jobs: Option<usize>,
    /// Resolve without touching `modforge.lock`.
    pub dry_run: bool,
    /// Print the manifest as JSON on stdout.
    pub json: bool,
}

/// Everything a resolution reads from the pack directory.
#[derive(Debug, Clone)]
pub struct PackInputs {
    pub pack: Pack,
    pub policy: PolicySet,
    pub lockfile: Option<Lockfile>,
}

impl PackInputs {
    /// Load `modforge.toml`, the optional policy file and the previous
    /// lockfile from `project_root`.
    pub fn load(project_root: &Path) -> miette::Result<Self> {
        let pack = Pack::from_path(&project_root.join(PACK_FILE))?;
        let policy_path = project_root.join(POLICY_FILE);
        let policy = if policy_path.is_file() {
            PolicySet::from_path(&policy_path)?
        } else {
            PolicySet::empty()
        };
        let lockfile = match Lockfile::load_optional(&project_root.join(LOCK_FILE)) {
            Ok(lock) => lock,
            Err(e) => {
                progress::status_warn("Ignoring", &format!("unreadable {LOCK_FILE}: {e}"));
                None
            }
        };
        tracing::debug!(
            "loaded pack `{}` with {} mods and {} policy rules",
            pack.pack.name,
            pack.mods.len(),
            policy.rules().len()
        );
        Ok(Self {
            pack,
            policy,
            lockfile,
        })
    }

    /// Versions recorded by the previous lockfile, by slug.
    pub fn pins(&self) -> BTreeMap<String, String> {
        self.lockfile
            .iter()
            .flat_map(|lock| &lock.mods)
            .map(|m| (m.slug.clone(), m.version_id.clone()))
            .collect()
    }
}

/// Resolve the pack in `project_root` and, unless `dry_run`, write the
/// lockfile.
pub async fn resolve(project_root: &Path, opts: &ResolveOpts) -> miette::Result<Resolution> {
    let inputs = PackInputs::load(project_root)?;
    let resolution = resolve_inputs(&inputs, opts).await?;
    let environment = inputs.pack.environment();

    if opts.json {
        let json = serde_json::to_string_pretty(&resolution.manifest).map_err(|e| {
            ModforgeError::Generic {
                message: format!("Failed to serialize manifest: {e}"),
            }
        })?;
        println!("{json}");
    } else {
        for entry in &resolution.manifest.entries {
            println!("{} {} ({})", entry.identity, entry.version, entry.reason);
        }
    }

    if opts.dry_run {
        progress::status_info("Skipped", &format!("writing {LOCK_FILE} (dry run)"));
    } else {
        let lockfile = resolution.manifest.to_lockfile(&environment);
        report_changes(inputs.lockfile.as_ref(), &lockfile);
        lockfile.write_to(&project_root.join(LOCK_FILE))?;
    }
    progress::status(
        "Resolved",
        &format!(
            "{} mods for {} ({} decisions)",
            resolution.manifest.len(),
            inputs.pack.pack.name,
            resolution.trail.len()
        ),
    );
    Ok(resolution)
}

/// Run the resolver over already loaded inputs.
pub async fn resolve_inputs(inputs: &PackInputs, opts: &ResolveOpts) -> miette::Result<Resolution> {
    let config = GlobalConfig::load()?;
    let registry = crate::open_registry(&opts.registry, &config.registry)?;
    let timeout = opts.timeout.unwrap_or_else(|| config.registry.timeout());
    let environment = inputs.pack.environment();

    let requirements = inputs.pack.requirements()?;
    let roots = root_selections(registry.as_ref(), &requirements, timeout).await?;

    let mut options = ResolveOptions::new(environment).with_pins(inputs.pins());
    options.fetch_timeout = timeout;
    options.max_concurrent_fetches = opts.jobs.unwrap_or(config.registry.max_concurrent_fetches);
    options.prompt = opts.prompt.clone();

    progress::status(
        "Resolving",
        &format!("{} ({} mods declared)", inputs.pack.pack.name, roots.len()),
    );
    // A prompt needs the terminal to itself.
    let spinner = opts
        .prompt
        .is_none()
        .then(|| progress::spinner("Resolving mods..."));
    let result = run_resolver(registry, &roots, &inputs.policy, &options).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let resolution = result.map_err(ModforgeError::from)?;
    for decision in &resolution.trail {
        tracing::info!("{decision}");
    }
    Ok(resolution)
}

/// Look up the project id of every declared mod and build root selections.
pub async fn root_selections(
    registry: &dyn RegistryQuery,
    requirements: &[PackRequirement],
    timeout: Duration,
) -> miette::Result<Vec<RootSelection>> {
    let mut roots = Vec::with_capacity(requirements.len());
    for req in requirements {
        let metadata = match tokio::time::timeout(timeout, registry.get_metadata(&req.slug)).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(FetchFailure::NotFound { .. })) => {
                return Err(ModforgeError::Pack {
                    message: format!("mod `{}` is not known to the registry", req.slug),
                }
                .into());
            }
            Ok(Err(e)) => return Err(ModforgeError::from(e).into()),
            Err(_) => {
                return Err(ModforgeError::from(FetchFailure::Timeout {
                    reference: req.slug.clone(),
                    timeout,
                })
                .into());
            }
        };
        roots.push(RootSelection {
            identity: metadata.identity,
            range: req.range.clone(),
            requirement: req.requirement.clone(),
            tags: req.loaders.clone().map(|loaders| CompatTags {
                loaders: Some(loaders),
                game_versions: None,
            }),
        });
    }
    Ok(roots)
}

/// Status lines for mods whose locked version changed.
fn report_changes(previous: Option<&Lockfile>, next: &Lockfile) {
    let Some(previous) = previous else {
        return;
    };
    for m in &next.mods {
        match previous.locked_version(&m.slug) {
            None => progress::status("Adding", &format!("{} {}", m.slug, m.version)),
            Some(old) if old.version_id != m.version_id => progress::status(
                "Updating",
                &format!("{} {} -> {}", m.slug, old.version, m.version),
            ),
            Some(_) => {}
        }
    }
    for old in &previous.mods {
        if next.locked_version(&old.slug).is_none() {
            progress::status("Removing", &format!("{} {}", old.slug, old.version));
        }
    }
}
