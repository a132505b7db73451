//! Interactive console.

use colored::*;
use std::path::Path;

use crate::error::RunalyzerResult;
use crate::output::{render_table, to_json, OutputFormat};
use crate::session::Session;
use crate::storage::{QueryResult, Storage};

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    /// Execute a (possibly mangled) query.
    Query(&'a str),
    /// Show the rewritten query without executing it.
    Mangle(&'a str),
    RunProps,
    Quantities,
    Clear,
    Exit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Parse a console line. Lines without a leading dot are queries.
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('.') else {
            return match line {
                "exit" | "quit" => Command::Exit,
                "help" => Command::Help,
                _ => Command::Query(line),
            };
        };

        let (cmd, args) = match rest.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (rest, ""),
        };

        match cmd {
            "help" => Command::Help,
            "q" => Command::Query(args),
            "mangle" => Command::Mangle(args),
            "runprops" => Command::RunProps,
            "quantities" => Command::Quantities,
            "clear" => Command::Clear,
            "exit" | "quit" => Command::Exit,
            _ => Command::Unknown(cmd),
        }
    }
}

/// Run one command and return the text to print.
///
/// `Clear` and `Exit` are handled by the console loop and produce nothing.
pub fn run_command<S: Storage>(
    session: &mut Session<S>,
    command: Command<'_>,
    format: OutputFormat,
) -> RunalyzerResult<Option<String>> {
    Ok(match command {
        Command::Help => Some(help_text()),
        Command::Query(sql) => {
            let result = session.q(sql, &[])?;
            Some(format_result(&result, format))
        }
        Command::Mangle(sql) => {
            let rewrite = session.mangle_sql(sql)?;
            let mut out = rewrite.sql;
            if !rewrite.columns.is_empty() {
                let columns: Vec<String> = rewrite.columns.iter().map(|c| c.to_string()).collect();
                out.push_str(&format!("\n-- columns: {}", columns.join(", ")));
            }
            Some(out)
        }
        Command::RunProps => Some(session.run_properties()?.join("\n")),
        Command::Quantities => {
            let result = session.quantities()?;
            Some(format_result(&result, format))
        }
        Command::Unknown(cmd) => Some(format!("invalid command '.{}', try .help", cmd)),
        Command::Clear | Command::Exit => None,
    })
}

fn format_result(result: &QueryResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut out = render_table(result);
            out.push_str(&format!("{} row(s) returned", result.rows.len()));
            out
        }
        OutputFormat::Json => serde_json::to_string_pretty(&to_json(result)).unwrap_or_default(),
    }
}

pub fn help_text() -> String {
    "\
Commands:
 .help          show this help message
 .q SQL         execute a (potentially mangled) query
 .mangle SQL    show the mangled form of a query without running it
 .runprops      show a list of run properties
 .quantities    show a list of time-dependent quantities
 .clear         clear the screen
 .exit          leave the console

Lines that do not start with '.' are executed as queries.

SQL mangling, if enabled:
    select $quantity where pred(feature)
    select $quantity.max, $other $$ where pred(feature)

    $name       per-rank values of quantity 'name'
    $name.agg   values aggregated over ranks with 'agg' (avg, min, max, sum, ...)
    $$          where to put the generated FROM clause

Custom SQLite functions:
    aggregates: var, stddev, norm1, norm2
    scalars:    sprintf, sqrt, pow"
        .to_string()
}

/// A history file that does not exist yet, as on first run.
fn is_missing_file(err: &rustyline::error::ReadlineError) -> bool {
    matches!(err, rustyline::error::ReadlineError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
}

/// Run the interactive console until `.exit` or end of input.
pub fn run_repl<S: Storage>(session: &mut Session<S>, history_path: Option<&Path>, format: OutputFormat) {
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    println!("{}", "runalyzer — interactive mode".cyan().bold());
    println!("{}", "Type .help for commands, .exit to quit.".dimmed());
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{} {}", "Failed to initialize console:".red(), e);
            return;
        }
    };

    if let Some(path) = history_path {
        if let Err(e) = rl.load_history(path) {
            if !is_missing_file(&e) {
                tracing::debug!(path = %path.display(), error = %e, "failed to load history");
            }
        }
    }

    loop {
        let prompt = "runalyzer> ".cyan().bold().to_string();
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Err(e) = rl.add_history_entry(line) {
                    tracing::debug!(error = %e, "failed to record history entry");
                }

                match Command::parse(line) {
                    Command::Exit => break,
                    Command::Clear => {
                        print!("\x1B[2J\x1B[1;1H");
                        continue;
                    }
                    command => match run_command(session, command, format) {
                        Ok(Some(out)) => println!("{}", out),
                        Ok(None) => {}
                        Err(e) => eprintln!("{} {}", "✗".red(), e.to_string().red()),
                    },
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red(), err);
                break;
            }
        }
    }

    if let Some(path) = history_path {
        if let Err(e) = rl.save_history(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::RecordingStorage;
    use crate::session::Mode;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(".help"), Command::Help);
        assert_eq!(Command::parse(".q select $t"), Command::Query("select $t"));
        assert_eq!(
            Command::parse("  .mangle   select $t.max  "),
            Command::Mangle("select $t.max")
        );
        assert_eq!(Command::parse(".runprops"), Command::RunProps);
        assert_eq!(Command::parse(".quantities"), Command::Quantities);
        assert_eq!(Command::parse(".quit"), Command::Exit);
        assert_eq!(Command::parse("exit"), Command::Exit);
        assert_eq!(Command::parse(".plot select 1"), Command::Unknown("plot"));
    }

    #[test]
    fn test_bare_line_is_query() {
        assert_eq!(Command::parse("select $t"), Command::Query("select $t"));
    }

    #[test]
    fn test_mangle_command_lists_columns() {
        let mut session = Session::new(RecordingStorage::default(), Mode::Expanded);
        let out = run_command(&mut session, Command::Mangle("select $a, $b.max"), OutputFormat::Table)
            .unwrap()
            .unwrap();
        assert!(out.starts_with("select a.value AS a, max_b.value AS b from runs "));
        assert!(out.ends_with("-- columns: $a, $b.max"));
    }

    #[test]
    fn test_query_command_renders_rows() {
        let mut session = Session::new(RecordingStorage::default(), Mode::Expanded);
        let out = run_command(&mut session, Command::Query("select $a"), OutputFormat::Table)
            .unwrap()
            .unwrap();
        assert!(out.ends_with("0 row(s) returned"));
    }

    #[test]
    fn test_unknown_command_message() {
        let mut session = Session::new(RecordingStorage::default(), Mode::Expanded);
        let out = run_command(&mut session, Command::Unknown("plot"), OutputFormat::Table)
            .unwrap()
            .unwrap();
        assert_eq!(out, "invalid command '.plot', try .help");
    }

    #[test]
    fn test_missing_history_file_is_expected() {
        use rustyline::error::ReadlineError;
        use std::io::{Error, ErrorKind};

        assert!(is_missing_file(&ReadlineError::Io(Error::from(ErrorKind::NotFound))));
        assert!(!is_missing_file(&ReadlineError::Io(Error::from(
            ErrorKind::PermissionDenied
        ))));
        assert!(!is_missing_file(&ReadlineError::Eof));
    }

    #[test]
    fn test_exit_produces_no_output() {
        let mut session = Session::new(RecordingStorage::default(), Mode::Literal);
        assert!(run_command(&mut session, Command::Exit, OutputFormat::Json)
            .unwrap()
            .is_none());
    }
}
