use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use ilpatch_file::{MethodDescriptor, Signature};
use ilpatch_vm::{Catalogue, DirSource, Engine, LoadOptions, Value, corelib};

#[derive(Parser)]
#[command(name = "ilpatch", about = "Inspect, verify and run published CIL patch sets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the patched methods of a published catalogue
    Info {
        /// Directory holding the manifest and descriptor files
        dir: PathBuf,
        /// Manifest file name within the directory
        #[arg(long, default_value = ilpatch_vm::catalogue::DEFAULT_MANIFEST)]
        manifest: String,
    },
    /// Print the instruction listing of one descriptor file
    Disasm {
        /// Path to the descriptor .json file
        input: PathBuf,
    },
    /// Check content keys and instruction streams of a published catalogue
    Verify {
        /// Directory holding the manifest and descriptor files
        dir: PathBuf,
        /// Manifest file name within the directory
        #[arg(long, default_value = ilpatch_vm::catalogue::DEFAULT_MANIFEST)]
        manifest: String,
    },
    /// Interpret a patched method with literal arguments
    Run {
        /// Directory holding the manifest and descriptor files
        dir: PathBuf,
        /// Canonical signature, e.g. `Game.Calc::Add(System.Int32,System.Int32)`
        signature: String,
        /// Receiver for instance methods
        #[arg(long = "this")]
        receiver: Option<String>,
        /// Arguments: integers, floats (`1.5`, `1.5f`, `2d`), true/false,
        /// null, anything else is a string
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { dir, manifest } => cmd_info(&dir, manifest),
        Commands::Disasm { input } => cmd_disasm(&input),
        Commands::Verify { dir, manifest } => cmd_verify(&dir, manifest),
        Commands::Run {
            dir,
            signature,
            receiver,
            args,
        } => cmd_run(&dir, &signature, receiver.as_deref(), &args),
    }
}

fn load_catalogue(dir: &Path, options: &LoadOptions) -> Catalogue {
    log::debug!("loading {} from {}", options.manifest_name, dir.display());
    match ilpatch_vm::load(&mut DirSource::new(dir), options) {
        Ok(catalogue) => catalogue,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_info(dir: &Path, manifest: String) {
    let options = LoadOptions {
        manifest_name: manifest,
        ..LoadOptions::default()
    };
    let catalogue = load_catalogue(dir, &options);

    println!("=== Patch Catalogue ===");
    println!("Directory:        {}", dir.display());
    println!("Manifest:         {}", options.manifest_name);
    println!("Patched methods:  {}", catalogue.len());
    println!();
    for signature in catalogue.signatures() {
        let Some(descriptor) = catalogue.get(signature) else {
            continue;
        };
        println!(
            "  {:<8} {} -> {}  ({} instructions, {} locals)",
            if descriptor.is_static { "static" } else { "instance" },
            signature,
            descriptor.return_type,
            descriptor.body.instructions.len(),
            descriptor.body.variables.len()
        );
    }
}

fn cmd_disasm(path: &Path) {
    let descriptor = match MethodDescriptor::open(path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!(
        ".method {}{} {}",
        if descriptor.is_static { "static " } else { "" },
        descriptor.return_type,
        descriptor.name
    );
    println!("{{");
    println!("    .maxstack {}", descriptor.body.max_stack_size);
    if !descriptor.body.variables.is_empty() {
        let locals: Vec<String> = descriptor
            .body
            .variables
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("[{i}] {ty}"))
            .collect();
        println!("    .locals ({})", locals.join(", "));
    }
    for (offset, insn) in &descriptor.body.instructions {
        let fallthrough = match insn.next_offset {
            Some(next) if !insn.opcode.is_terminator() => format!("  # -> IL_{next:04x}"),
            _ => String::new(),
        };
        println!("    IL_{offset:04x}: {insn}{fallthrough}");
    }
    println!("}}");

    let problems = descriptor.body.validate();
    if !problems.is_empty() {
        println!();
        for problem in &problems {
            println!("# {problem}");
        }
    }
}

fn cmd_verify(dir: &Path, manifest: String) {
    let options = LoadOptions {
        manifest_name: manifest,
        verify_content_keys: true,
    };
    let catalogue = load_catalogue(dir, &options);

    let mut failures = 0usize;
    for (signature, descriptor) in catalogue.iter() {
        let problems = descriptor.body.validate();
        if problems.is_empty() {
            continue;
        }
        failures += 1;
        println!("{signature}:");
        for problem in problems {
            println!("    {problem}");
        }
    }

    if failures > 0 {
        eprintln!(
            "Error: {failures} of {} descriptors have problems",
            catalogue.len()
        );
        std::process::exit(1);
    }
    println!("{} descriptors verified", catalogue.len());
}

fn cmd_run(dir: &Path, signature: &str, receiver: Option<&str>, args: &[String]) {
    let catalogue = load_catalogue(dir, &LoadOptions::default());
    let symbols = match corelib::symbol_table() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let engine = Engine::new(catalogue, symbols);

    let result = Signature::parse(signature)
        .map_err(ilpatch_vm::Error::from)
        .and_then(|sig| {
            let receiver = receiver.map(parse_literal);
            let args = args.iter().map(|a| parse_literal(a)).collect();
            engine.invoke(&sig, receiver, args)
        });
    match result {
        Ok(Value::Null) => {}
        Ok(value) => println!("{value}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Command-line literal to value.
fn parse_literal(text: &str) -> Value {
    match text {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return i32::try_from(n).map_or(Value::I64(n), Value::I32);
    }
    if let Some(x) = text.strip_suffix('f').and_then(|t| t.parse::<f32>().ok()) {
        return Value::F32(x);
    }
    if let Some(x) = text.strip_suffix('d').and_then(|t| t.parse::<f64>().ok()) {
        return Value::F64(x);
    }
    if let Ok(x) = text.parse::<f64>() {
        return Value::F64(x);
    }
    Value::str(text)
}
