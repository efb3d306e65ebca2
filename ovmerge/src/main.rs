//! Merge device-tree overlay sources into a single DTS on stdout.
//!
//! Each positional argument names a `.dts` file with optional parameter
//! bindings. If the first file is an overlay, the rest are merged into it;
//! otherwise the first is a base tree and the remaining overlays are merged
//! together and then applied onto it.

mod cli;
mod git;
mod logger;

use std::env;
use std::io;
use std::process;

use log::LevelFilter;

use cli::{CliError, Options};
use dts_tree::param::apply_parameter;
use dts_tree::source::LocalFiles;
use dts_tree::tree::{Cell, Chunk, Tree};
use dts_tree::{emit, overlay, FileOpener};

fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();
    if let Err(message) = run(argv) {
        eprintln!("{message}");
        process::exit(1);
    }
}

fn run(argv: Vec<String>) -> Result<(), String> {
    let argv = if argv.iter().any(|arg| arg == "-r") {
        let stdin = io::stdin();
        cli::replay_args(&mut stdin.lock()).map_err(describe_cli)?
    } else {
        argv
    };
    let options = cli::parse_args(&argv).map_err(describe_cli)?;

    logger::init(if options.trace {
        LevelFilter::Trace
    } else if options.warn {
        LevelFilter::Warn
    } else {
        LevelFilter::Error
    });

    let opener: Box<dyn FileOpener> = match &options.branch {
        Some(branch) => Box::new(git::GitFiles::new(branch.clone())),
        None => Box::new(LocalFiles),
    };

    if options.show_includes {
        for spec in &options.ovspecs {
            let visited = dts_tree::include_tree(&*opener, &spec.file)
                .map_err(|err| format!("ovmerge: {err}"))?;
            for (depth, file) in visited {
                println!("{}{file}", "  ".repeat(depth));
            }
        }
        return Ok(());
    }

    let trees = load_trees(&options, &*opener)?;
    let merged = compose(&options, trees)?;

    if options.redo_comment {
        println!("// redo: ovmerge {}", cli::quote_args(&argv));
    }
    print!("{}", emit::emit(&merged, options.sort));
    Ok(())
}

fn describe_cli(err: CliError) -> String {
    match err {
        CliError::Help => cli::USAGE.to_string(),
        CliError::Bad(message) => format!("ovmerge: {message}\n{}", cli::USAGE),
    }
}

/// Load every input, apply its parameters and honor the bake request.
fn load_trees(options: &Options, opener: &dyn FileOpener) -> Result<Vec<Tree>, String> {
    let mut trees = Vec::new();
    for spec in &options.ovspecs {
        let mut tree = dts_tree::load(opener, &spec.file)
            .map_err(|err| format!("ovmerge: {}: {err}", spec.file))?;
        for (name, value) in &spec.params {
            apply_parameter(&mut tree, name, value.as_deref())
                .map_err(|err| format!("ovmerge: {}: {err}", spec.file))?;
        }
        if spec.bake {
            if let Some(overrides) = tree.child(tree.root(), "__overrides__") {
                tree.delete_node(overrides);
            }
        }
        trees.push(tree);
    }
    Ok(trees)
}

fn compose(options: &Options, trees: Vec<Tree>) -> Result<Tree, String> {
    let mut iter = trees.into_iter();
    let Some(mut first) = iter.next() else {
        return Err(describe_cli(CliError::Bad("no input files".to_string())));
    };
    let rest: Vec<Tree> = iter.collect();

    for (tree, spec) in rest.iter().zip(&options.ovspecs[1..]) {
        if !tree.plugin {
            return Err(format!(
                "ovmerge: {}",
                dts_tree::DtsError::NotPlugin(spec.file.clone())
            ));
        }
    }

    if first.plugin {
        overlay::renumber_fragments(&mut first, 0);
        for tree in rest {
            overlay::merge(&mut first, tree).map_err(|err| format!("ovmerge: {err}"))?;
        }
        return Ok(first);
    }

    let mut base = first;
    if options.pi_extras {
        pi_extras(&mut base).map_err(|err| format!("ovmerge: {err}"))?;
    }
    // Some overlays expect a symbols node on the base.
    if rest.len() > 1 && base.child(base.root(), "__symbols__").is_none() {
        let root = base.root();
        base.add_child(root, "__symbols__");
    }

    let mut overlays = rest.into_iter();
    if let Some(mut combined) = overlays.next() {
        overlay::renumber_fragments(&mut combined, 0);
        for tree in overlays {
            overlay::merge(&mut combined, tree).map_err(|err| format!("ovmerge: {err}"))?;
        }
        overlay::apply(&mut base, &combined).map_err(|err| format!("ovmerge: {err}"))?;
    }
    Ok(base)
}

/// `-p`: mirror `/aliases/i2c1` into `i2c` and `i2c_arm`, labels included,
/// the way Pi firmware expects to address the ARM-side bus.
fn pi_extras(base: &mut Tree) -> dts_tree::Result<()> {
    let root = base.root();
    let Some(aliases) = base.child(root, "aliases") else {
        log::warn!("-p: base tree has no /aliases node");
        return Ok(());
    };
    let Some(alias) = base.property(aliases, "i2c1") else {
        log::warn!("-p: base tree has no /aliases/i2c1");
        return Ok(());
    };
    let (chunk, label) = match alias.chunks.first() {
        Some(chunk @ Chunk::Ref(label)) => (chunk.clone(), label.clone()),
        Some(chunk @ Chunk::Cells { items, .. }) => match items.first() {
            Some(Cell::Ref(label)) => (chunk.clone(), label.clone()),
            _ => {
                log::warn!("-p: /aliases/i2c1 is not a label reference");
                return Ok(());
            }
        },
        _ => {
            log::warn!("-p: /aliases/i2c1 is not a label reference");
            return Ok(());
        }
    };
    let target = base
        .find_label(&label)
        .ok_or(dts_tree::DtsError::UnknownLabel(label))?;
    base.set_property(aliases, "i2c", vec![chunk.clone()])?;
    base.set_property(aliases, "i2c_arm", vec![chunk])?;
    base.add_label(target, "i2c")?;
    base.add_label(target, "i2c_arm")?;
    Ok(())
}
