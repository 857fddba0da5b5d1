//! The install pipeline.
//!
//! Routing: a bare name goes to the system package manager when it ships
//! the package, otherwise to the recipe catalog; `OWNER/REPO[@REF]` goes
//! straight to an ad-hoc source build. Recipe requests pass through the
//! resolver; the pinned plan is built by a bounded worker pool that
//! respects dependency topology, and the invocation publishes exactly one
//! new generation and one state rewrite, both under the root lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::builder::{Builder, BuildSource, Built};
use crate::core::catalog::Catalog;
use crate::core::recipe::{expand_repo_shorthand, Recipe};
use crate::core::resolver::{self, CandidateSource, Request};
use crate::core::version::Version;
use crate::ops::{OpContext, OpError, Spec};
use crate::registry::system::SystemPm;
use crate::store::state::Entry;

/// One unit of plan execution; `deps` are node ids within the same plan.
struct PlanNode {
    id: String,
    source: BuildSource,
    deps: Vec<String>,
}

/// Routed work for one invocation.
#[derive(Default)]
pub(crate) struct Routed {
    pub system: Vec<(SystemPm, String)>,
    pub requests: Vec<Request>,
    pub remotes: Vec<(String, String, Option<String>)>,
}

#[derive(Debug)]
pub struct InstallReport {
    pub built: Vec<Built>,
    /// `(pm, package)` pairs delegated to the system package manager.
    pub system: Vec<(String, String)>,
    pub generation: u64,
}

struct CatalogSource<'a> {
    catalog: Catalog<'a>,
}

impl CandidateSource for CatalogSource<'_> {
    fn candidates(&self, name: &str) -> Result<Vec<Recipe>, anyhow::Error> {
        let found = self.catalog.candidates(name).map_err(anyhow::Error::from)?;
        Ok(found.into_iter().map(|f| f.recipe).collect())
    }
}

/// Install the given `NAME[CONSTRAINT]` / `OWNER/REPO[@REF]` arguments.
pub async fn install(
    ctx: &OpContext,
    raw_specs: &[String],
    from_github: bool,
) -> Result<InstallReport, OpError> {
    let specs = raw_specs
        .iter()
        .map(|s| Spec::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    let routed = route(ctx, &specs, from_github)?;
    run_pipeline(ctx, routed).await
}

/// Decide the route for each spec. System and recipe availability are
/// checked here so the pipeline only sees work that can succeed.
fn route(ctx: &OpContext, specs: &[Spec], from_github: bool) -> Result<Routed, OpError> {
    let mut routed = Routed::default();
    let system_pm = SystemPm::detect();

    for spec in specs {
        match spec {
            Spec::Remote {
                owner,
                repo,
                git_ref,
            } => routed
                .remotes
                .push((owner.clone(), repo.clone(), git_ref.clone())),

            Spec::Named { name, constraint } => {
                if from_github {
                    return Err(OpError::BadSpec(format!(
                        "{name}: --from-github requires OWNER/REPO"
                    )));
                }

                if constraint.is_any() {
                    if let Some(pm) = system_pm {
                        if pm.has_package(name) {
                            routed.system.push((pm, name.clone()));
                            continue;
                        }
                    }
                }

                let catalog = ctx.catalog();
                if catalog.find(name, constraint)?.is_none() {
                    return Err(OpError::NotFound(name.clone()));
                }
                routed.requests.push(Request {
                    name: name.clone(),
                    constraint: constraint.clone(),
                });
            }
        }
    }

    Ok(routed)
}

/// Resolve, build, and publish one routed invocation.
pub(crate) async fn run_pipeline(
    ctx: &OpContext,
    routed: Routed,
) -> Result<InstallReport, OpError> {
    // Pin the recipe plan.
    let plan: Vec<Recipe> = if routed.requests.is_empty() {
        Vec::new()
    } else {
        let source = CatalogSource {
            catalog: ctx.catalog(),
        };
        resolver::resolve(&source, &routed.requests)?
    };

    // Plan nodes: recipes in topological order, then ad-hoc remotes.
    let mut nodes: Vec<PlanNode> = Vec::new();
    let plan_names: HashSet<String> = plan.iter().map(|r| r.name.clone()).collect();
    for recipe in &plan {
        nodes.push(PlanNode {
            id: recipe.name.clone(),
            source: BuildSource::Recipe(recipe.clone()),
            deps: recipe
                .dependencies
                .iter()
                .map(|d| d.name.clone())
                .filter(|n| plan_names.contains(n))
                .collect(),
        });
    }
    for (owner, repo, git_ref) in &routed.remotes {
        nodes.push(PlanNode {
            id: format!("{owner}/{repo}"),
            source: BuildSource::Remote {
                name: repo.clone(),
                url: expand_repo_shorthand(&format!("{owner}/{repo}")),
                git_ref: git_ref.clone(),
            },
            deps: Vec::new(),
        });
    }

    let order: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let completed = execute_plan(ctx.builder(), nodes).await?;

    // Delegate system packages before touching profile state.
    let mut system_report = Vec::new();
    for (pm, package) in &routed.system {
        pm.install(package)?;
        system_report.push((pm.name().to_string(), package.clone()));
    }

    // Keys available to the next generation: everything currently
    // advertised plus the new ones, new ones last so they shadow older
    // builds of the same package.
    let mut available = ctx.current_artifacts();
    for id in &order {
        let key = &completed[id].key;
        available.retain(|k| k != key);
        available.push(key.clone());
    }

    // Declarative entries for the user-requested packages only.
    let mut entries = ctx.state.read()?;
    for (pm, package) in &routed.system {
        upsert(
            &mut entries,
            Entry::System {
                pm: pm.name().to_string(),
                name: package.clone(),
            },
        );
    }
    for request in &routed.requests {
        let pinned: Version = plan
            .iter()
            .find(|r| r.name == request.name)
            .map(|r| r.version.clone())
            .expect("resolved plan covers every request");
        upsert(
            &mut entries,
            Entry::Recipe {
                name: request.name.clone(),
                version: pinned,
            },
        );
    }
    for (owner, repo, git_ref) in &routed.remotes {
        upsert(
            &mut entries,
            Entry::RemoteRepo {
                owner: owner.clone(),
                repo: repo.clone(),
                git_ref: git_ref.clone(),
            },
        );
    }

    // The generation advertises exactly the entries' closure; artifacts no
    // entry reaches anymore (e.g. upgraded-away versions) drop out here.
    let artifacts =
        crate::ops::remove::artifacts_for_entries(&ctx.store, &available, &entries)?;

    // Publish: one generation, one state rewrite, one lock span.
    let snapshot: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
    let _lock = ctx.lock()?;
    let manifest = ctx.profiles.publish(&ctx.store, &artifacts, snapshot)?;
    ctx.state.write(&entries)?;

    let mut built: Vec<Built> = Vec::new();
    let mut by_id = completed;
    for id in &order {
        if let Some(b) = by_id.remove(id) {
            built.push(b);
        }
    }

    Ok(InstallReport {
        built,
        system: system_report,
        generation: manifest.number,
    })
}

/// Replace the entry with the same key or append.
pub(crate) fn upsert(entries: &mut Vec<Entry>, entry: Entry) {
    match entries.iter().position(|e| e.key() == entry.key()) {
        Some(pos) => entries[pos] = entry,
        None => entries.push(entry),
    }
}

/// Build every node, bounded-parallel, dependencies strictly first.
async fn execute_plan(
    builder: Builder,
    nodes: Vec<PlanNode>,
) -> Result<HashMap<String, Built>, OpError> {
    let limit = std::cmp::max(2, num_cpus::get() / 2);
    let semaphore = Arc::new(Semaphore::new(limit));

    let mut pending: VecDeque<PlanNode> = nodes.into();
    let mut completed: HashMap<String, Built> = HashMap::new();
    let mut set: JoinSet<(String, Result<Built, crate::core::builder::BuildError>)> =
        JoinSet::new();

    loop {
        // Spawn everything whose dependencies are placed in the store.
        let mut index = 0;
        while index < pending.len() {
            let ready = pending[index]
                .deps
                .iter()
                .all(|d| completed.contains_key(d));
            if !ready {
                index += 1;
                continue;
            }

            let node = pending.remove(index).expect("index in bounds");
            if completed.contains_key(&node.id) {
                continue;
            }

            let dep_keys: Vec<String> = node
                .deps
                .iter()
                .map(|d| completed[d].key.clone())
                .collect();
            let builder = builder.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let result = builder.build(&node.source, &dep_keys).await;
                (node.id, result)
            });
        }

        if set.is_empty() {
            if pending.is_empty() {
                return Ok(completed);
            }
            // A valid topological plan always has a ready node.
            return Err(OpError::Io(std::io::Error::other(
                "plan wedged: unresolved dependencies",
            )));
        }

        match set.join_next().await.expect("set not empty") {
            Ok((id, Ok(built))) => {
                completed.insert(id, built);
            }
            Ok((_, Err(e))) => {
                set.abort_all();
                return Err(e.into());
            }
            Err(e) => {
                set.abort_all();
                return Err(OpError::Io(std::io::Error::other(e)));
            }
        }
    }
}
