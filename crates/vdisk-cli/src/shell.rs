//! The read-eval-print shell.
//!
//! Commands are split on single spaces with no quoting; one engine
//! operation per command. Nothing propagates across command
//! boundaries: every diagnostic goes to stderr and the loop reads the
//! next line unconditionally.

use anyhow::Result;
use std::io::{self, BufRead, Write};
use vdisk_block::ByteDevice;
use vdisk_core::VirtualDisk;

const PROMPT: &str = "Virtual_Disk$ ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Run the interactive loop until `exit` or end of input.
pub fn repl<D: ByteDevice>(disk: &mut VirtualDisk<D>) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{PROMPT}");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break; // end of input behaves like `exit`
        };
        if dispatch(disk, &line?) == Flow::Exit {
            break;
        }
    }
    disk.sync()?;
    Ok(())
}

/// Tokenize one input line: single-space delimiters, no quoting.
fn tokenize(line: &str) -> Vec<&str> {
    line.split(' ').collect()
}

/// Arity check; the diagnostic to print when the count is off.
fn arity_error(argc: usize, min: usize, max: usize) -> Option<&'static str> {
    if argc < min {
        Some("Too few arguments for this command!")
    } else if argc > max {
        Some("Too many arguments for this command!")
    } else {
        None
    }
}

fn checked(argc: usize, min: usize, max: usize) -> bool {
    match arity_error(argc, min, max) {
        Some(message) => {
            eprintln!("{message}");
            false
        }
        None => true,
    }
}

fn report(result: vdisk_error::Result<()>) {
    if let Err(err) = result {
        eprintln!("{err}");
    }
}

fn parse_count(token: &str) -> Option<u32> {
    match token.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            eprintln!("Invalid number of bytes!");
            None
        }
    }
}

fn dispatch<D: ByteDevice>(disk: &mut VirtualDisk<D>, line: &str) -> Flow {
    let tokens = tokenize(line);
    let argc = tokens.len();

    match tokens[0] {
        "ls" => {
            if checked(argc, 1, 1) {
                match disk.list() {
                    Ok(entries) => {
                        for e in &entries {
                            println!(
                                "{} {} {} {} {}",
                                e.ino,
                                e.link_count,
                                e.size,
                                e.kind(),
                                e.name
                            );
                        }
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
        }
        "pwd" => {
            if checked(argc, 1, 1) {
                println!("{}", disk.pwd());
            }
        }
        "info" => {
            if checked(argc, 1, 1) {
                match disk.usage() {
                    Ok(u) => {
                        println!(
                            "Usage of space (in bytes): {}/{}",
                            u.bytes_used, u.bytes_total
                        );
                        println!(
                            "Usage of data blocks: {}/{}",
                            u.data_blocks_used, u.data_blocks_total
                        );
                        println!("Usage of i-nodes: {}/{}", u.inodes_used, u.inodes_total);
                        println!();
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
        }
        "cd" => {
            if checked(argc, 2, 2) {
                report(disk.cd(tokens[1]));
            }
        }
        "mkdir" => {
            if checked(argc, 2, 2) {
                report(disk.mkdir(tokens[1]));
            }
        }
        "ucp" => {
            if checked(argc, 3, 3) {
                report(disk.copy_in(tokens[1], tokens[2]));
            }
        }
        "dcp" => {
            if checked(argc, 3, 3) {
                report(disk.copy_out(tokens[1], tokens[2]));
            }
        }
        "ab" => {
            if checked(argc, 3, 3) {
                if let Some(n) = parse_count(tokens[2]) {
                    report(disk.add_bytes(tokens[1], n));
                }
            }
        }
        "db" => {
            if checked(argc, 3, 3) {
                if let Some(n) = parse_count(tokens[2]) {
                    report(disk.delete_bytes(tokens[1], n));
                }
            }
        }
        "ln" => {
            if checked(argc, 3, 3) {
                report(disk.link(tokens[1], tokens[2]));
            }
        }
        "rm" => {
            if checked(argc, 2, 2) {
                report(disk.unlink(tokens[1]));
            }
        }
        "cat" => {
            if checked(argc, 2, 2) {
                match disk.read_all(tokens[1]) {
                    Ok(bytes) => {
                        let mut stdout = io::stdout();
                        let _ = stdout.write_all(&bytes);
                        let _ = stdout.flush();
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
        }
        "exit" => {
            if checked(argc, 1, 1) {
                return Flow::Exit;
            }
        }
        unknown => eprintln!("{unknown}: command not found!"),
    }

    Flow::Continue
}
