//! Shell emulator: tokenizes a command line, splits compound commands on `;`/`&&`/`||`/
//! `|`, and dispatches each simple command through the [`catalogue::Catalogue`]
//! (SPEC_FULL §4.5).
//!
//! Grounded on `parser/parser.rs`'s tokenizing style: a small hand-rolled scanner over
//! the line's bytes, matching the teacher's choice to write its own wire tokenizer rather
//! than reach for a parser-combinator crate.

pub mod catalogue;
pub mod commands;

use crate::session::Session;
use crate::vfs::Vfs;

pub use catalogue::Catalogue;

/// In-memory stdio for one simple command. Pipeline stages share these buffers: a
/// stage's stdout becomes the next stage's stdin (SPEC_FULL §4.5, "executed sequentially
/// with a shared in-memory buffer between stages").
#[derive(Debug, Default, Clone)]
pub struct Io {
    pub stdin: Vec<u8>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Semicolon,
    And,
    Or,
    Pipe,
    RedirectOut(String),
    RedirectAppend(String),
    RedirectIn(String),
}

#[derive(Debug)]
pub enum ShellError {
    UnterminatedQuote,
    DanglingRedirect,
}

/// Tokenizes a line with POSIX-like quoting: single quotes preserve their contents
/// literally, double quotes allow `\` to escape `"` and `\`, and a backslash outside any
/// quoting escapes the next byte.
fn tokenize(line: &str) -> Result<Vec<Token>, ShellError> {
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_word = false;

    macro_rules! flush_word {
        () => {
            if in_word {
                tokens.push(Token::Word(std::mem::take(&mut word)));
                in_word = false;
            }
        };
    }

    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' => {
                flush_word!();
                i += 1;
            }
            b'\'' => {
                in_word = true;
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(ShellError::UnterminatedQuote);
                }
                word.push_str(&line[start..i]);
                i += 1;
            }
            b'"' => {
                in_word = true;
                i += 1;
                loop {
                    if i >= bytes.len() {
                        return Err(ShellError::UnterminatedQuote);
                    }
                    match bytes[i] {
                        b'"' => {
                            i += 1;
                            break;
                        }
                        b'\\' if i + 1 < bytes.len() && matches!(bytes[i + 1], b'"' | b'\\') => {
                            word.push(bytes[i + 1] as char);
                            i += 2;
                        }
                        c => {
                            word.push(c as char);
                            i += 1;
                        }
                    }
                }
            }
            b'\\' if i + 1 < bytes.len() => {
                in_word = true;
                word.push(bytes[i + 1] as char);
                i += 2;
            }
            b';' => {
                flush_word!();
                tokens.push(Token::Semicolon);
                i += 1;
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                flush_word!();
                tokens.push(Token::And);
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                flush_word!();
                tokens.push(Token::Or);
                i += 2;
            }
            b'|' => {
                flush_word!();
                tokens.push(Token::Pipe);
                i += 1;
            }
            b'>' if bytes.get(i + 1) == Some(&b'>') => {
                flush_word!();
                tokens.push(Token::RedirectAppend(read_redirect_target(line, bytes, &mut i, 2)?));
            }
            b'>' => {
                flush_word!();
                tokens.push(Token::RedirectOut(read_redirect_target(line, bytes, &mut i, 1)?));
            }
            b'<' => {
                flush_word!();
                tokens.push(Token::RedirectIn(read_redirect_target(line, bytes, &mut i, 1)?));
            }
            c => {
                in_word = true;
                word.push(c as char);
                i += 1;
            }
        }
    }
    flush_word!();
    Ok(tokens)
}

fn read_redirect_target(line: &str, bytes: &[u8], i: &mut usize, skip: usize) -> Result<String, ShellError> {
    *i += skip;
    while *i < bytes.len() && matches!(bytes[*i], b' ' | b'\t') {
        *i += 1;
    }
    let start = *i;
    while *i < bytes.len() && !matches!(bytes[*i], b' ' | b'\t' | b';' | b'|' | b'&' | b'<' | b'>') {
        *i += 1;
    }
    if *i == start {
        return Err(ShellError::DanglingRedirect);
    }
    Ok(line[start..*i].to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Always,
    And,
    Or,
}

#[derive(Debug, Default)]
struct SimpleCommand {
    argv: Vec<String>,
    stdout_redirect: Option<(String, bool)>,
    stdin_redirect: Option<String>,
}

#[derive(Debug)]
struct Clause {
    separator: Separator,
    pipeline: Vec<SimpleCommand>,
}

fn parse(tokens: Vec<Token>) -> Vec<Clause> {
    let mut clauses = Vec::new();
    let mut separator = Separator::Always;
    let mut pipeline: Vec<SimpleCommand> = Vec::new();
    let mut current = SimpleCommand::default();

    for token in tokens {
        match token {
            Token::Word(w) => current.argv.push(w),
            Token::RedirectOut(p) => current.stdout_redirect = Some((p, false)),
            Token::RedirectAppend(p) => current.stdout_redirect = Some((p, true)),
            Token::RedirectIn(p) => current.stdin_redirect = Some(p),
            Token::Pipe => pipeline.push(std::mem::take(&mut current)),
            Token::Semicolon | Token::And | Token::Or => {
                pipeline.push(std::mem::take(&mut current));
                clauses.push(Clause { separator, pipeline: std::mem::take(&mut pipeline) });
                separator = match token {
                    Token::And => Separator::And,
                    Token::Or => Separator::Or,
                    _ => Separator::Always,
                };
            }
        }
    }
    let trailing_is_meaningful = !current.argv.is_empty()
        || current.stdout_redirect.is_some()
        || current.stdin_redirect.is_some()
        || !pipeline.is_empty();
    if trailing_is_meaningful {
        pipeline.push(current);
        clauses.push(Clause { separator, pipeline });
    }
    clauses
}

/// The outcome of running one (possibly compound) command line.
pub struct ExecResult {
    /// Combined stdout (of the pipeline's final stage) and stderr (of every stage),
    /// in the order produced -- what a real terminal would show.
    pub output: Vec<u8>,
    pub exit_status: i32,
}

/// Tokenizes, parses, and executes one command line against `session` and `vfs`.
pub async fn execute(line: &str, catalogue: &Catalogue, session: &mut Session, vfs: &dyn Vfs) -> Result<ExecResult, ShellError> {
    let tokens = tokenize(line)?;
    let clauses = parse(tokens);
    let mut output = Vec::new();
    let mut status = 0;
    for clause in clauses {
        match clause.separator {
            Separator::And if status != 0 => continue,
            Separator::Or if status == 0 => continue,
            _ => {}
        }
        status = run_pipeline(&clause.pipeline, catalogue, session, vfs, &mut output).await;
        if session.should_exit.is_some() {
            break;
        }
    }
    Ok(ExecResult { output, exit_status: status })
}

async fn run_pipeline(
    pipeline: &[SimpleCommand],
    catalogue: &Catalogue,
    session: &mut Session,
    vfs: &dyn Vfs,
    output: &mut Vec<u8>,
) -> i32 {
    let mut stdin = Vec::new();
    let mut status = 0;
    let last = pipeline.len().saturating_sub(1);
    for (idx, cmd) in pipeline.iter().enumerate() {
        if cmd.argv.is_empty() {
            continue;
        }
        if let Some(path) = &cmd.stdin_redirect {
            stdin = read_redirect_source(vfs, session, path).await;
        }
        let mut io = Io { stdin: std::mem::take(&mut stdin), stdout: Vec::new(), stderr: Vec::new() };
        status = catalogue.dispatch(cmd.argv.clone(), &mut io, session, vfs).await;
        session.pace().await;

        if let Some((path, append)) = &cmd.stdout_redirect {
            write_redirect(vfs, session, path, &io.stdout, *append).await;
        } else if idx == last {
            output.extend_from_slice(&io.stdout);
        }
        output.extend_from_slice(&io.stderr);
        stdin = io.stdout;
    }
    status
}

async fn read_redirect_source(vfs: &dyn Vfs, session: &Session, path: &str) -> Vec<u8> {
    match crate::vfs::resolve(&session.cwd, path) {
        Ok(resolved) => vfs.open_read(&resolved).await.unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

async fn write_redirect(vfs: &dyn Vfs, session: &Session, path: &str, content: &[u8], append: bool) {
    let Ok(resolved) = crate::vfs::resolve(&session.cwd, path) else { return };
    let mut data = if append { vfs.open_read(&resolved).await.unwrap_or_default() } else { Vec::new() };
    data.extend_from_slice(content);
    let _ = vfs.open_write(&resolved, data, 0o644).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_words() {
        let tokens = tokenize("ls -la /tmp").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("ls".to_string()),
                Token::Word("-la".to_string()),
                Token::Word("/tmp".to_string()),
            ]
        );
    }

    #[test]
    fn single_quotes_are_fully_literal() {
        let tokens = tokenize("echo 'a;b|c'").unwrap();
        assert_eq!(tokens, vec![Token::Word("echo".to_string()), Token::Word("a;b|c".to_string())]);
    }

    #[test]
    fn double_quotes_allow_escaping_quote_and_backslash() {
        let tokens = tokenize(r#"echo "a\"b\\c""#).unwrap();
        assert_eq!(tokens, vec![Token::Word("echo".to_string()), Token::Word(r#"a"b\c"#.to_string())]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(matches!(tokenize("echo 'unterminated"), Err(ShellError::UnterminatedQuote)));
    }

    #[test]
    fn splits_on_operators() {
        let tokens = tokenize("a; b && c || d | e").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("a".to_string()),
                Token::Semicolon,
                Token::Word("b".to_string()),
                Token::And,
                Token::Word("c".to_string()),
                Token::Or,
                Token::Word("d".to_string()),
                Token::Pipe,
                Token::Word("e".to_string()),
            ]
        );
    }

    #[test]
    fn recognizes_redirections() {
        let tokens = tokenize("cat < in.txt > out.txt").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("cat".to_string()),
                Token::RedirectIn("in.txt".to_string()),
                Token::RedirectOut("out.txt".to_string()),
            ]
        );
    }

    #[test]
    fn parse_groups_pipeline_stages_and_separators() {
        let tokens = tokenize("a | b && c").unwrap();
        let clauses = parse(tokens);
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].separator, Separator::Always);
        assert_eq!(clauses[0].pipeline.len(), 2);
        assert_eq!(clauses[1].separator, Separator::And);
        assert_eq!(clauses[1].pipeline.len(), 1);
    }
}
