//! # CLI Command Implementations
//!
//! Local commands act as [`OPERATOR`] under [`AllowAll`]: whoever can open
//! the database file already has full control of it. The HTTP server uses
//! per-formula access lists instead.

use super::{CommercialArgs, IngredientKey, SubstanceKey};
use crate::api::{self, ServerSession};
use crate::config::{AppConfig, BackendKind};
use crate::error::AppError;
use blendgraph_core::{
    AccessList, AccessPolicy, AllowAll, BlendError, Catalog, CommercialInfo, Composition,
    CompositionRead, Concentration, EventSink, Formula, FormulaId, IngredientPatch, MemoryStore,
    NewIngredient, NewSubstanceEdge, RedbStore, Session, StorageBackend, SubstanceId,
    SubstancePatch, TracingSink, TreeNode, UserId,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Identity recorded for edits made from the command line.
pub const OPERATOR: UserId = UserId(0);

/// Session type used by local commands.
pub type CliSession = Session<AllowAll, TracingSink>;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a JSON catalog read from disk (100 MB).
const MAX_CATALOG_FILE_SIZE: u64 = 100 * 1024 * 1024;

fn validate_file_size(path: &Path, max_size: u64) -> Result<(), AppError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| AppError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(AppError::Catalog(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize `path` and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, AppError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| AppError::Io(format!("Invalid file path '{}': {}", path.display(), e)))?;

    if !canonical.is_file() {
        return Err(AppError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

/// Canonicalize the parent directory of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, AppError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        AppError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(AppError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| AppError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn read_catalog(path: &Path) -> Result<Catalog, AppError> {
    let path = validate_file_path(path)?;
    validate_file_size(&path, MAX_CATALOG_FILE_SIZE)?;
    let data = std::fs::read(&path)
        .map_err(|e| AppError::Io(format!("Read '{}': {}", path.display(), e)))?;
    serde_json::from_slice(&data).map_err(|e| AppError::Catalog(e.to_string()))
}

fn write_catalog(catalog: &Catalog, path: &Path) -> Result<PathBuf, AppError> {
    let path = validate_output_path(path)?;
    let data =
        serde_json::to_vec_pretty(catalog).map_err(|e| AppError::Catalog(e.to_string()))?;
    std::fs::write(&path, data)
        .map_err(|e| AppError::Io(format!("Write '{}': {}", path.display(), e)))?;
    Ok(path)
}

// =============================================================================
// OUTPUT
// =============================================================================

/// Output mode shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    /// Print `value` as JSON in json mode, otherwise run `text`.
    fn emit<T: Serialize>(self, value: &T, text: impl FnOnce()) -> Result<(), AppError> {
        if self.json {
            let rendered = serde_json::to_string_pretty(value)
                .map_err(|e| AppError::Io(format!("Render JSON: {}", e)))?;
            println!("{}", rendered);
        } else {
            text();
        }
        Ok(())
    }
}

// =============================================================================
// SESSION LOADING
// =============================================================================

/// Open the configured store and build a session over it.
///
/// `policy_for` sees every stored formula, so access lists can be derived
/// from ownership and publication status.
pub fn load_or_create_session<P: AccessPolicy>(
    config: &AppConfig,
    policy_for: impl FnOnce(&[Formula]) -> P,
) -> Result<Session<P, TracingSink>, AppError> {
    let limits = config.traversal_limits();
    let path = &config.storage.database;

    let (backend, formulas) = match config.storage.backend {
        BackendKind::Redb => {
            let store = RedbStore::open(path)?;
            let formulas = store.formulas()?;
            (StorageBackend::Persistent(store), formulas)
        }
        BackendKind::Memory => {
            let mut store = MemoryStore::new();
            if path.exists() {
                read_catalog(path)?.apply(&mut store, &limits)?;
            }
            let formulas = store.formulas()?;
            (StorageBackend::InMemory(store), formulas)
        }
    };

    let policy = policy_for(&formulas);
    Ok(Session::with_backend(backend, policy, TracingSink).with_limits(limits))
}

/// Session for local commands.
pub fn open_cli_session(config: &AppConfig) -> Result<CliSession, AppError> {
    load_or_create_session(config, |_| AllowAll)
}

/// Session for the HTTP server: owners edit their formulas, published
/// formulas are readable by everyone.
pub fn open_server_session(config: &AppConfig) -> Result<ServerSession, AppError> {
    load_or_create_session(config, |formulas| AccessList::from_formulas(formulas))
}

/// Persist a memory-backed session to its catalog file. redb sessions are
/// already durable.
pub fn save_session<P: AccessPolicy, E: EventSink>(
    session: &Session<P, E>,
    config: &AppConfig,
) -> Result<(), AppError> {
    if session.is_persistent() {
        return Ok(());
    }
    write_catalog(&session.export_catalog()?, &config.storage.database)?;
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(config: &AppConfig, out: Output) -> Result<(), AppError> {
    let session = open_server_session(config)?;

    if !out.quiet {
        println!("Blendgraph Server Starting...");
        println!();
        println!("Configuration:");
        println!("  Address:  {}", config.server.bind_addr());
        println!("  Backend:  {}", config.storage.backend);
        println!("  Database: {}", config.storage.database.display());
        println!(
            "  Limits:   {} nodes, depth {}",
            config.limits.max_nodes, config.limits.max_depth
        );
        if config.storage.backend == BackendKind::Memory {
            println!("  Note:     memory backend, edits are lost on shutdown");
        }
        println!();
        println!("Press Ctrl+C to stop");
        println!();
    }

    api::run_server(&config.server, session).await
}

// =============================================================================
// STORE COMMANDS
// =============================================================================

pub fn cmd_status(config: &AppConfig, out: Output) -> Result<(), AppError> {
    let session = open_cli_session(config)?;
    let stats = session.stats()?;

    let report = serde_json::json!({
        "database": config.storage.database.to_string_lossy(),
        "backend": config.storage.backend,
        "formulas": stats.formulas,
        "substances": stats.substances,
        "ingredients": stats.ingredients,
        "substance_edges": stats.substance_edges,
    });
    out.emit(&report, || {
        println!("Blendgraph Status");
        println!("=================");
        println!("Database: {}", config.storage.database.display());
        println!("Backend:  {}", config.storage.backend);
        println!();
        println!("Formulas:        {}", stats.formulas);
        println!("Substances:      {}", stats.substances);
        println!("Compound edges:  {}", stats.ingredients);
        println!("Substance edges: {}", stats.substance_edges);
    })
}

pub fn cmd_init(config: &AppConfig, out: Output, force: bool) -> Result<(), AppError> {
    let path = &config.storage.database;
    if path.exists() {
        if !force {
            return Err(AppError::Io(format!(
                "'{}' already exists (use --force to overwrite)",
                path.display()
            )));
        }
        std::fs::remove_file(path)
            .map_err(|e| AppError::Io(format!("Remove '{}': {}", path.display(), e)))?;
    }

    match config.storage.backend {
        BackendKind::Redb => {
            RedbStore::open(path)?;
        }
        BackendKind::Memory => {
            write_catalog(&Catalog::default(), path)?;
        }
    }

    tracing::info!(path = %path.display(), backend = %config.storage.backend, "store initialized");
    out.emit(&serde_json::json!({ "initialized": path }), || {
        if !out.quiet {
            println!("Initialized empty {} store at {}", config.storage.backend, path.display());
        }
    })
}

pub fn cmd_import(config: &AppConfig, out: Output, input: &Path) -> Result<(), AppError> {
    let catalog = read_catalog(input)?;
    let mut session = open_cli_session(config)?;
    let summary = session.import_catalog(catalog)?;
    save_session(&session, config)?;

    out.emit(&summary, || {
        println!(
            "Imported {} formulas, {} substances, {} compound edges, {} substance edges",
            summary.formulas, summary.substances, summary.ingredients, summary.substance_edges
        );
    })
}

pub fn cmd_export(config: &AppConfig, out: Output, output: &Path) -> Result<(), AppError> {
    let session = open_cli_session(config)?;
    let catalog = session.export_catalog()?;
    let written = write_catalog(&catalog, output)?;

    out.emit(
        &serde_json::json!({
            "output": written,
            "formulas": catalog.formulas.len(),
            "substances": catalog.substances.len(),
        }),
        || {
            println!(
                "Exported {} formulas and {} substances to {}",
                catalog.formulas.len(),
                catalog.substances.len(),
                written.display()
            );
        },
    )
}

pub fn cmd_compact(config: &AppConfig, out: Output) -> Result<(), AppError> {
    let mut session = open_cli_session(config)?;
    session.compact()?;
    out.emit(&serde_json::json!({ "compacted": session.is_persistent() }), || {
        if session.is_persistent() {
            println!("Compacted {}", config.storage.database.display());
        } else {
            println!("Nothing to compact for the memory backend");
        }
    })
}

// =============================================================================
// COMPOUND INGREDIENT COMMANDS
// =============================================================================

fn parse_concentration(text: &str) -> Result<f64, AppError> {
    Ok(Concentration::parse(text)?.value())
}

pub fn cmd_add_ingredient(
    config: &AppConfig,
    out: Output,
    key: IngredientKey,
    concentration: &str,
    unit: Option<String>,
    order: Option<u32>,
) -> Result<(), AppError> {
    let request = NewIngredient {
        parent: FormulaId(key.parent),
        ingredient: FormulaId(key.ingredient),
        concentration: parse_concentration(concentration)?,
        unit,
        order,
    };
    let mut session = open_cli_session(config)?;
    let edge = session.add_compound_ingredient(OPERATOR, request)?;
    save_session(&session, config)?;

    out.emit(&edge, || {
        println!(
            "Added formula {} to formula {} at {} {} (position {})",
            edge.ingredient,
            edge.parent,
            edge.concentration.value(),
            edge.unit,
            edge.order
        );
    })
}

pub fn cmd_update_ingredient(
    config: &AppConfig,
    out: Output,
    key: IngredientKey,
    concentration: Option<&str>,
    unit: Option<String>,
    order: Option<u32>,
) -> Result<(), AppError> {
    let patch = IngredientPatch {
        concentration: concentration.map(parse_concentration).transpose()?,
        unit,
        order,
    };
    let mut session = open_cli_session(config)?;
    let edge = session.update_compound_ingredient(
        OPERATOR,
        FormulaId(key.parent),
        FormulaId(key.ingredient),
        patch,
    )?;
    save_session(&session, config)?;

    out.emit(&edge, || {
        println!(
            "Formula {} in formula {}: {} {} (position {})",
            edge.ingredient,
            edge.parent,
            edge.concentration.value(),
            edge.unit,
            edge.order
        );
    })
}

pub fn cmd_remove_ingredient(
    config: &AppConfig,
    out: Output,
    key: IngredientKey,
) -> Result<(), AppError> {
    let mut session = open_cli_session(config)?;
    let edge = session.remove_compound_ingredient(
        OPERATOR,
        FormulaId(key.parent),
        FormulaId(key.ingredient),
    )?;
    save_session(&session, config)?;

    out.emit(&edge, || {
        println!("Removed formula {} from formula {}", edge.ingredient, edge.parent);
    })
}

// =============================================================================
// SUBSTANCE COMMANDS
// =============================================================================

pub fn cmd_add_substance(
    config: &AppConfig,
    out: Output,
    key: SubstanceKey,
    concentration: &str,
    unit: Option<String>,
    order: Option<u32>,
    commercial: CommercialArgs,
) -> Result<(), AppError> {
    let request = NewSubstanceEdge {
        formula: FormulaId(key.formula),
        substance: SubstanceId(key.substance),
        concentration: parse_concentration(concentration)?,
        unit,
        order,
        commercial: CommercialInfo {
            supplier: commercial.supplier,
            dilution: commercial.dilution,
            price: commercial.price,
        },
    };
    let mut session = open_cli_session(config)?;
    let edge = session.add_substance(OPERATOR, request)?;
    save_session(&session, config)?;

    out.emit(&edge, || {
        println!(
            "Added substance {} to formula {} at {} {} (position {})",
            edge.substance,
            edge.formula,
            edge.concentration.value(),
            edge.unit,
            edge.order
        );
    })
}

pub fn cmd_update_substance(
    config: &AppConfig,
    out: Output,
    key: SubstanceKey,
    concentration: Option<&str>,
    unit: Option<String>,
    order: Option<u32>,
    commercial: CommercialArgs,
) -> Result<(), AppError> {
    let patch = SubstancePatch {
        concentration: concentration.map(parse_concentration).transpose()?,
        unit,
        order,
        supplier: commercial.supplier,
        dilution: commercial.dilution,
        price: commercial.price,
    };
    let mut session = open_cli_session(config)?;
    let edge = session.update_substance(
        OPERATOR,
        FormulaId(key.formula),
        SubstanceId(key.substance),
        patch,
    )?;
    save_session(&session, config)?;

    out.emit(&edge, || {
        println!(
            "Substance {} in formula {}: {} {} (position {})",
            edge.substance,
            edge.formula,
            edge.concentration.value(),
            edge.unit,
            edge.order
        );
    })
}

pub fn cmd_remove_substance(
    config: &AppConfig,
    out: Output,
    key: SubstanceKey,
) -> Result<(), AppError> {
    let mut session = open_cli_session(config)?;
    let edge = session.remove_substance(
        OPERATOR,
        FormulaId(key.formula),
        SubstanceId(key.substance),
    )?;
    save_session(&session, config)?;

    out.emit(&edge, || {
        println!("Removed substance {} from formula {}", edge.substance, edge.formula);
    })
}

// =============================================================================
// READ COMMANDS
// =============================================================================

pub fn cmd_flatten(
    config: &AppConfig,
    out: Output,
    formula: u64,
    places: Option<u32>,
) -> Result<(), AppError> {
    let session = open_cli_session(config)?;
    let composition = session.flatten(OPERATOR, FormulaId(formula))?;
    let composition = match places {
        Some(p) => composition.rounded(p),
        None => composition,
    };
    out.emit(&composition, || print_composition(&composition))
}

fn print_composition(composition: &Composition) {
    println!(
        "{} (formula {}), {} per 1000",
        composition.root_name,
        composition.root,
        composition.base_unit.per_mille_label()
    );
    println!();
    if composition.rows.is_empty() {
        println!("  (no raw substances)");
        return;
    }
    for row in &composition.rows {
        let cas = row
            .substance
            .cas
            .as_deref()
            .map(|c| format!(" [{}]", c))
            .unwrap_or_default();
        println!(
            "  {:>12.4}  {:<8} {}{}",
            row.total_concentration, row.unit, row.substance.name, cas
        );
        if row.sources.len() > 1 {
            for source in &row.sources {
                println!(
                    "  {:>12}  {:<8}   {:.4} via {}",
                    "", "", source.contribution, source.formula_name
                );
            }
        }
    }
    println!();
    println!("  {:>12.4}  total", composition.total());
}

pub fn cmd_tree(config: &AppConfig, out: Output, formula: u64) -> Result<(), AppError> {
    let session = open_cli_session(config)?;
    let tree = session.tree(OPERATOR, FormulaId(formula))?;
    out.emit(&tree, || print_tree(&tree, 0))
}

fn print_tree(node: &TreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match (node.concentration, node.unit.as_deref()) {
        (Some(c), Some(unit)) => println!(
            "{}{} (formula {}) {} {}, x{:.4}",
            indent, node.formula_name, node.formula_id, c, unit, node.multiplier
        ),
        _ => println!("{}{} (formula {})", indent, node.formula_name, node.formula_id),
    }
    for leaf in &node.substances {
        println!(
            "{}  - {} {} {} (effective {:.4})",
            indent, leaf.substance_name, leaf.concentration, leaf.unit, leaf.effective
        );
    }
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

pub fn cmd_used_in(config: &AppConfig, out: Output, formula: u64) -> Result<(), AppError> {
    let session = open_cli_session(config)?;
    let parents = session.used_in(OPERATOR, FormulaId(formula))?;
    out.emit(&parents, || {
        if parents.is_empty() {
            println!("Formula {} is not used as a compound", formula);
        }
        for parent in &parents {
            println!("  {} (formula {})", parent.name, parent.id);
        }
    })
}

// =============================================================================
// CYCLE COMMANDS
// =============================================================================

pub fn cmd_check_cycle(
    config: &AppConfig,
    out: Output,
    key: IngredientKey,
) -> Result<(), AppError> {
    let session = open_cli_session(config)?;
    let cycle =
        session.would_create_cycle(OPERATOR, FormulaId(key.parent), FormulaId(key.ingredient))?;

    out.emit(
        &serde_json::json!({
            "parent": key.parent,
            "ingredient": key.ingredient,
            "would_create_cycle": cycle,
        }),
        || {
            if cycle {
                println!(
                    "Adding formula {} to formula {} would create a circular dependency",
                    key.ingredient, key.parent
                );
            } else {
                println!(
                    "Formula {} can be added to formula {}",
                    key.ingredient, key.parent
                );
            }
        },
    )
}

/// Scan the whole store. A found cycle is printed and returned as an error
/// so the process exits non-zero.
pub fn cmd_verify(config: &AppConfig, out: Output) -> Result<(), AppError> {
    let session = open_cli_session(config)?;
    let cycle = session.verify_acyclic()?;

    out.emit(
        &serde_json::json!({ "acyclic": cycle.is_none(), "cycle": cycle }),
        || match &cycle {
            None => println!("No cycles found"),
            Some(path) => println!("Cycle found: {:?}", path),
        },
    )?;

    match cycle {
        None => Ok(()),
        Some(path) => Err(BlendError::GraphIntegrity {
            formula: path.first().copied().unwrap_or(FormulaId(0)),
            path,
        }
        .into()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use blendgraph_core::{ErrorKind, Substance};
    use tempfile::{TempDir, tempdir};

    fn memory_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.backend = BackendKind::Memory;
        config.storage.database = dir.path().join("catalog.json");
        config
    }

    fn redb_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.database = dir.path().join("graph.db");
        config
    }

    fn seed_catalog(dir: &TempDir) -> PathBuf {
        let catalog = Catalog {
            formulas: vec![
                Formula::new(FormulaId(1), "Top", UserId(7)),
                Formula::new(FormulaId(2), "Base", UserId(7)),
            ],
            substances: vec![
                Substance::new(SubstanceId(10), "S1"),
                Substance::new(SubstanceId(20), "S2"),
            ],
            ..Catalog::default()
        };
        let path = dir.path().join("seed.json");
        write_catalog(&catalog, &path).expect("write seed");
        path
    }

    fn quiet() -> Output {
        Output {
            json: true,
            quiet: true,
        }
    }

    fn exercise(config: &AppConfig, seed: &Path) {
        cmd_import(config, quiet(), seed).expect("import");
        cmd_add_ingredient(
            config,
            quiet(),
            IngredientKey {
                parent: 1,
                ingredient: 2,
            },
            "500",
            None,
            None,
        )
        .expect("nest");
        cmd_add_substance(
            config,
            quiet(),
            SubstanceKey {
                formula: 1,
                substance: 20,
            },
            "100",
            None,
            None,
            CommercialArgs::default(),
        )
        .expect("S2");
        cmd_add_substance(
            config,
            quiet(),
            SubstanceKey {
                formula: 2,
                substance: 10,
            },
            "200",
            None,
            None,
            CommercialArgs::default(),
        )
        .expect("S1");

        let session = open_cli_session(config).expect("reopen");
        let composition = session.flatten(OPERATOR, FormulaId(1)).expect("flatten");
        let ids: Vec<_> = composition.rows.iter().map(|r| r.substance.id).collect();
        assert_eq!(ids, vec![SubstanceId(20), SubstanceId(10)]);
        drop(session);

        let err = cmd_add_ingredient(
            config,
            quiet(),
            IngredientKey {
                parent: 2,
                ingredient: 1,
            },
            "10",
            None,
            None,
        );
        assert!(matches!(
            err,
            Err(AppError::Core(ref e)) if e.kind() == ErrorKind::CycleDetected
        ));
        cmd_verify(config, quiet()).expect("acyclic");
    }

    #[test]
    fn memory_backend_persists_through_catalog_file() {
        let dir = tempdir().expect("tempdir");
        let seed = seed_catalog(&dir);
        let config = memory_config(&dir);
        exercise(&config, &seed);
        assert!(config.storage.database.exists());
    }

    #[test]
    fn redb_backend_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let seed = seed_catalog(&dir);
        let config = redb_config(&dir);
        exercise(&config, &seed);
        cmd_compact(&config, quiet()).expect("compact");
    }

    #[test]
    fn export_then_import_into_fresh_store() {
        let dir = tempdir().expect("tempdir");
        let seed = seed_catalog(&dir);
        let config = redb_config(&dir);
        cmd_import(&config, quiet(), &seed).expect("import");
        let out = dir.path().join("out.json");
        cmd_export(&config, quiet(), &out).expect("export");

        let copy = memory_config(&dir);
        cmd_import(&copy, quiet(), &out).expect("import copy");
        let stats = open_cli_session(&copy).expect("open").stats().expect("stats");
        assert_eq!(stats.formulas, 2);
        assert_eq!(stats.substances, 2);
    }

    #[test]
    fn invalid_concentration_text_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let seed = seed_catalog(&dir);
        let config = memory_config(&dir);
        cmd_import(&config, quiet(), &seed).expect("import");
        let result = cmd_add_substance(
            &config,
            quiet(),
            SubstanceKey {
                formula: 1,
                substance: 10,
            },
            "lots",
            None,
            None,
            CommercialArgs::default(),
        );
        assert!(matches!(
            result,
            Err(AppError::Core(BlendError::InvalidConcentration(_)))
        ));
    }

    #[test]
    fn check_cycle_on_unknown_formula_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let seed = seed_catalog(&dir);
        let config = memory_config(&dir);
        cmd_import(&config, quiet(), &seed).expect("import");

        cmd_check_cycle(
            &config,
            quiet(),
            IngredientKey {
                parent: 2,
                ingredient: 1,
            },
        )
        .expect("known formulas");

        let result = cmd_check_cycle(
            &config,
            quiet(),
            IngredientKey {
                parent: 1,
                ingredient: 99,
            },
        );
        match result {
            Err(AppError::Core(e)) => assert_eq!(e.kind(), ErrorKind::NotFound),
            other => unreachable!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempdir().expect("tempdir");
        let config = memory_config(&dir);
        cmd_init(&config, quiet(), false).expect("init");
        assert!(cmd_init(&config, quiet(), false).is_err());
        cmd_init(&config, quiet(), true).expect("force");
    }

    #[test]
    fn server_session_grants_owner_edit() {
        let dir = tempdir().expect("tempdir");
        let seed = seed_catalog(&dir);
        let config = memory_config(&dir);
        cmd_import(&config, quiet(), &seed).expect("import");

        let mut session = open_server_session(&config).expect("open");
        let stranger = session.add_compound_ingredient(
            UserId(99),
            NewIngredient::new(FormulaId(1), FormulaId(2), 100.0),
        );
        assert!(matches!(
            stranger,
            Err(ref e) if e.kind() == ErrorKind::AccessDenied
        ));
        session
            .add_compound_ingredient(
                UserId(7),
                NewIngredient::new(FormulaId(1), FormulaId(2), 100.0),
            )
            .expect("owner edit");
    }

    #[test]
    fn missing_catalog_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let config = memory_config(&dir);
        let result = cmd_import(&config, quiet(), &dir.path().join("absent.json"));
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
