//! `extbrowse` is a small interactive browser for ext2/ext3/ext4 images.
//!
//! It lists the root directory of the given image and then takes entry
//! indexes from the prompt: directories are descended into, regular files are
//! dumped to a file named after the entry. A selection sequence can also be
//! passed on the command line for scripted runs.

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::exit;

use anyhow::{bail, Context, Result};

use extbrowse::dev::{BlockDevice, ImageSource};
use extbrowse::fs::ext::dir::DirEntry;
use extbrowse::fs::ext::inode::InodeNumber;
use extbrowse::fs::ext::ExtFs;
use extbrowse::fs::EntryKind;

/// Command line arguments.
#[derive(Default)]
struct Args {
    /// The name of the current program used in the command line.
    prog: String,

    /// If true, print command line help.
    help: bool,

    /// The image or block device to browse.
    image: Option<PathBuf>,

    /// Scripted entry selections; interactive when empty.
    script: Vec<i64>,
}

fn parse_args() -> Args {
    let mut args = Args::default();

    let mut iter = env::args();
    args.prog = iter.next().unwrap_or_else(|| "extbrowse".to_owned());

    for arg in iter {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            _ => {
                if args.image.is_none() {
                    args.image = Some(arg.into());
                } else if let Ok(selection) = arg.parse::<i64>() {
                    args.script.push(selection);
                } else {
                    eprintln!("{}: invalid selection '{}'", args.prog, arg);
                    exit(1);
                }
            }
        }
    }

    args
}

/// Prints command usage.
fn print_usage(prog: &str) {
    eprintln!("{prog}: bad usage");
    eprintln!("Try '{prog} --help' for more information.");
}

fn print_help(prog: &str) {
    println!("usage: {prog} [-h] <image> [selection...]");
    println!();
    println!("Browse an ext2/ext3/ext4 filesystem image or block device.");
    println!();
    println!("With no selections, the browser is interactive: it prints the");
    println!("current directory and prompts for an entry index (-1 exits).");
    println!("Selections given on the command line are applied in order");
    println!("instead. Directories are entered; regular files are written to");
    println!("a file named after the entry in the working directory.");
}

fn print_listing(entries: &[DirEntry]) {
    println!(" ID |      INODE | TYPE         | NAME");
    println!("----|------------|--------------|-----------------");
    for entry in entries {
        println!(
            "{:3} | {:10} | {:<12} | {}",
            entry.id,
            entry.inode,
            entry.kind.to_string(),
            entry.name_display(),
        );
    }
}

/// Reads one selection from the prompt. `None` means unparsable input.
fn prompt_choice() -> Option<i64> {
    print!("Enter your choice (-1 to exit): ");
    io::stdout().flush().ok()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line).ok()?;
    if line.is_empty() {
        // EOF behaves like an exit request
        return Some(-1);
    }
    line.trim().parse().ok()
}

fn dump_file<D: BlockDevice>(fs: &mut ExtFs<D>, entry: &DirEntry) -> Result<()> {
    let name = entry.name_display().into_owned();
    let out = File::create(&name).with_context(|| format!("cannot create '{name}'"))?;
    let mut writer = BufWriter::new(out);
    let written = fs
        .extract_file(entry.inode, &mut writer)
        .with_context(|| format!("cannot extract '{name}'"))?;
    writer.flush().with_context(|| format!("cannot write '{name}'"))?;
    println!("Wrote {written} bytes to {name}");
    Ok(())
}

fn browse(args: &Args) -> Result<()> {
    let path = args.image.as_ref().unwrap();
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut fs = ExtFs::mount(ImageSource::new(file))?;

    let mut entries = fs.list_directory(InodeNumber::ROOT)?;
    print_listing(&entries);

    let interactive = args.script.is_empty();
    let mut script = args.script.iter().copied();

    loop {
        let choice = if interactive {
            match prompt_choice() {
                Some(choice) => choice,
                None => {
                    println!("Not a number");
                    continue;
                }
            }
        } else {
            match script.next() {
                Some(choice) => choice,
                None => break,
            }
        };

        if choice == -1 {
            break;
        }

        let entry = usize::try_from(choice)
            .ok()
            .and_then(|index| entries.get(index))
            .cloned();
        let Some(entry) = entry else {
            if interactive {
                println!("No entry {choice}");
                continue;
            }
            bail!("no entry {choice}");
        };

        match entry.kind {
            EntryKind::Directory => {
                entries = fs.list_directory(entry.inode)?;
                print_listing(&entries);
            }
            EntryKind::Regular => {
                if let Err(e) = dump_file(&mut fs, &entry) {
                    if !interactive {
                        return Err(e);
                    }
                    eprintln!("{}: {e:#}", args.prog);
                }
            }
            other => println!("File type not supported: {other}"),
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let args = parse_args();
    if args.help {
        print_help(&args.prog);
        return;
    }
    if args.image.is_none() {
        print_usage(&args.prog);
        exit(1);
    }

    if let Err(e) = browse(&args) {
        eprintln!("{}: {e:#}", args.prog);
        exit(1);
    }
}
