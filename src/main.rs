/// SchemaTree - property recommender CLI
use schematree::ingest::TreeBuilder;
use schematree::strategy::{Assessment, Workflow, WorkflowConfig};
use schematree::tree::{PropertyRecommender, SchemaTree, TreeConfig, TYPE_PREFIX};
use std::env;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing::Level;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_ENV: &str = "SCHEMATREE_LOG";

fn print_usage() {
    eprintln!("SchemaTree v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    schematree [OPTIONS] <COMMAND> [ARGS]");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    build <SUBJECTS>             Build a tree from a subject file");
    eprintln!("    recommend <TREE> <ITEMS>...  Recommend properties for the given items");
    eprintln!("    support <TREE> <ITEMS>...    Print how many subjects use all given items");
    eprintln!("    stats <TREE>                 Print tree statistics");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help               Print this help message");
    eprintln!("    -V, --version            Print version information");
    eprintln!("    -v, -vv                  Log at debug / trace level (or set {})", LOG_ENV);
    eprintln!("    -o, --output <FILE>      build: snapshot path (default: <SUBJECTS>.schematree.bin)");
    eprintln!("    --typed                  build: keep t# type items");
    eprintln!("    --first <N>              build: only read the first N subjects");
    eprintln!("    --workflow <FILE>        recommend: workflow configuration (TOML)");
    eprintln!("    --preset <NAME>          recommend: named workflow (default: direct)");
    eprintln!("    --limit <N>              recommend: print at most N candidates");
    eprintln!();
    eprintln!("ITEMS:");
    eprintln!("    Property identifiers; prefix a type with '{}'.", TYPE_PREFIX);
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    schematree build subjects.tsv -o wiki.bin");
    eprintln!("    schematree recommend wiki.bin --preset best P31 P21");
    eprintln!("    schematree support wiki.bin P31 P21");
}

fn print_version() {
    println!("SchemaTree {}", VERSION);
}

enum Command {
    Build {
        input: String,
        output: Option<String>,
        typed: bool,
        first: Option<usize>,
    },
    Recommend {
        tree: String,
        workflow: Option<String>,
        preset: Option<String>,
        limit: Option<usize>,
        items: Vec<String>,
    },
    Support {
        tree: String,
        items: Vec<String>,
    },
    Stats {
        tree: String,
    },
}

struct Options {
    verbosity: u8,
    command: Command,
}

fn parse_number(flag: &str, value: Option<&String>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("Missing value after {}", flag))?;
    value
        .parse()
        .map_err(|_| format!("Invalid number for {}: {}", flag, value))
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut verbosity: u8 = 0;
    let mut output = None;
    let mut typed = false;
    let mut first = None;
    let mut workflow = None;
    let mut preset = None;
    let mut limit = None;
    let mut positional = Vec::new();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-V" | "--version" => {
                print_version();
                process::exit(0);
            }
            "-v" => verbosity = verbosity.max(1),
            "-vv" => verbosity = 2,
            "-o" | "--output" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing output file after -o".to_string());
                }
                output = Some(args[i].clone());
            }
            "--typed" => typed = true,
            "--first" => {
                i += 1;
                first = Some(parse_number("--first", args.get(i))?);
            }
            "--limit" => {
                i += 1;
                limit = Some(parse_number("--limit", args.get(i))?);
            }
            "--workflow" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing file after --workflow".to_string());
                }
                workflow = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing name after --preset".to_string());
                }
                preset = Some(args[i].clone());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    if workflow.is_some() && preset.is_some() {
        return Err("--workflow and --preset are mutually exclusive".to_string());
    }

    if positional.is_empty() {
        return Err("Missing command".to_string());
    }
    let name = positional.remove(0);
    if positional.is_empty() {
        return Err(format!("Missing file argument for '{}'", name));
    }
    let target = positional.remove(0);
    let items = positional;

    let command = match name.as_str() {
        "build" => Command::Build {
            input: target,
            output,
            typed,
            first,
        },
        "recommend" => Command::Recommend {
            tree: target,
            workflow,
            preset,
            limit,
            items,
        },
        "support" => Command::Support { tree: target, items },
        "stats" => Command::Stats { tree: target },
        other => return Err(format!("Unknown command: {}", other)),
    };

    Ok(Options { verbosity, command })
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => env::var(LOG_ENV)
            .ok()
            .and_then(|value| value.parse::<Level>().ok())
            .unwrap_or(Level::WARN),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn load_tree(path: &str) -> Result<Arc<SchemaTree>, String> {
    SchemaTree::load(path)
        .map(Arc::new)
        .map_err(|e| format!("Failed to load tree '{}': {}", path, e))
}

fn unknown_items<'a>(tree: &SchemaTree, items: &'a [String]) -> Vec<&'a str> {
    items
        .iter()
        .map(String::as_str)
        .filter(|iri| !tree.registry().contains(iri))
        .collect()
}

/// Split raw arguments into property and type identifiers.
fn split_items(items: &[String]) -> (Vec<&str>, Vec<&str>) {
    let mut properties = Vec::new();
    let mut types = Vec::new();
    for item in items {
        match item.strip_prefix(TYPE_PREFIX) {
            Some(ty) => types.push(ty),
            None => properties.push(item.as_str()),
        }
    }
    (properties, types)
}

fn run_build(input: &str, output: Option<&str>, typed: bool, first: Option<usize>) -> Result<(), String> {
    let config = TreeConfig {
        typed,
        ..TreeConfig::default()
    };
    let mut builder = TreeBuilder::new(config);
    if let Some(n) = first {
        builder = builder.first_n(n);
    }

    let tree = builder
        .build_from_path(input)
        .map_err(|e| format!("Failed to build tree from '{}': {}", input, e))?;

    let output = output
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.schematree.bin", input));
    tree.save(&output)
        .map_err(|e| format!("Failed to save tree to '{}': {}", output, e))?;

    let stats = tree.stats();
    println!(
        "{} subjects, {} nodes, {} properties, {} types -> {}",
        stats.root_support, stats.nodes, stats.properties, stats.types, output
    );
    Ok(())
}

fn run_recommend(
    path: &str,
    workflow: Option<&str>,
    preset: Option<&str>,
    limit: Option<usize>,
    items: &[String],
) -> Result<(), String> {
    let tree = load_tree(path)?;
    let recommender = Arc::new(PropertyRecommender::new(Arc::clone(&tree)));

    let workflow = match workflow {
        Some(file) => WorkflowConfig::from_file(file)
            .and_then(|config| config.build(recommender))
            .map_err(|e| format!("Failed to load workflow '{}': {}", file, e))?,
        None => Workflow::preset(preset.unwrap_or("direct"), recommender).map_err(|e| e.to_string())?,
    };

    let unknown = unknown_items(&tree, items);
    if !unknown.is_empty() {
        eprintln!("Warning: ignoring items unknown to the tree: {}", unknown.join(" "));
    }
    let (properties, types) = split_items(items);
    let assessment = Assessment::from_input(&tree, &properties, &types, true);
    if assessment.is_unresolved() {
        eprintln!("Warning: none of the given items is known; nothing to recommend");
    }

    let start = Instant::now();
    let mut recommendations = workflow.recommend(&assessment);
    let elapsed = start.elapsed();
    if let Some(n) = limit {
        recommendations = recommendations.truncated(n);
    }

    print!("{}", recommendations);
    eprintln!("{} candidates in {:.2?}", recommendations.len(), elapsed);
    Ok(())
}

fn run_support(path: &str, items: &[String]) -> Result<(), String> {
    let tree = load_tree(path)?;
    // An unknown item occurs in no subject.
    if !unknown_items(&tree, items).is_empty() {
        println!("0");
        return Ok(());
    }
    let (properties, types) = split_items(items);
    println!("{}", tree.support(&tree.resolve(&properties, &types)));
    Ok(())
}

fn run_stats(path: &str) -> Result<(), String> {
    let tree = load_tree(path)?;
    let stats = tree.stats();
    println!("subjects:    {}", stats.root_support);
    println!("nodes:       {}", stats.nodes);
    println!("max depth:   {}", stats.max_depth);
    println!("properties:  {}", stats.properties);
    println!("types:       {}", stats.types);
    println!("typed:       {}", tree.is_typed());
    println!("min support: {}", tree.min_support());

    println!();
    println!("most frequent properties:");
    for (iri, count) in tree.property_frequencies().iter().take(10) {
        println!("    {:>10}  {}", count, iri);
    }
    let types = tree.type_frequencies();
    if !types.is_empty() {
        println!();
        println!("most frequent types:");
        for (iri, count) in types.iter().take(10) {
            println!("    {:>10}  {}", count, iri);
        }
    }
    Ok(())
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    init_logging(options.verbosity);

    let result = match &options.command {
        Command::Build {
            input,
            output,
            typed,
            first,
        } => run_build(input, output.as_deref(), *typed, *first),
        Command::Recommend {
            tree,
            workflow,
            preset,
            limit,
            items,
        } => run_recommend(tree, workflow.as_deref(), preset.as_deref(), *limit, items),
        Command::Support { tree, items } => run_support(tree, items),
        Command::Stats { tree } => run_stats(tree),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
