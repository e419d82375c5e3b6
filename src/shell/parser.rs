use std::mem;

use crate::error::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Truncate,
    Append,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: String,
    pub mode: OutputMode,
}

/// One stage of a pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    pub input: Option<String>,
    pub output: Option<OutputRedirect>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub background: bool,
    /// The line as typed, shown by `jobs`.
    pub text: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    Input,
    Output,
    Append,
    Background,
}

fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    let flush = |tokens: &mut Vec<Token>, word: &mut String, in_word: &mut bool| {
        if *in_word {
            tokens.push(Token::Word(mem::take(word)));
            *in_word = false;
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(ParseError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.peek() {
                            Some(&escaped @ ('"' | '\\')) => {
                                word.push(escaped);
                                chars.next();
                            }
                            _ => word.push('\\'),
                        },
                        Some(c) => word.push(c),
                        None => return Err(ParseError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                word.push(chars.next().unwrap_or('\\'));
            }
            '#' if !in_word => break,
            '|' | '<' | '>' | '&' => {
                flush(&mut tokens, &mut word, &mut in_word);
                tokens.push(match c {
                    '|' => Token::Pipe,
                    '<' => Token::Input,
                    '&' => Token::Background,
                    _ if chars.peek() == Some(&'>') => {
                        chars.next();
                        Token::Append
                    }
                    _ => Token::Output,
                });
            }
            c if c.is_whitespace() => flush(&mut tokens, &mut word, &mut in_word),
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    flush(&mut tokens, &mut word, &mut in_word);

    Ok(tokens)
}

fn parse_stage(tokens: Vec<Token>) -> Result<Command, ParseError> {
    let mut words = Vec::new();
    let mut command = Command::default();
    let mut tokens = tokens.into_iter();

    while let Some(token) = tokens.next() {
        let operator = match token {
            Token::Word(word) => {
                words.push(word);
                continue;
            }
            Token::Input => "<",
            Token::Output => ">",
            Token::Append => ">>",
            Token::Pipe | Token::Background => unreachable!("split before parsing stages"),
        };

        let path = match tokens.next() {
            Some(Token::Word(path)) => path,
            _ => return Err(ParseError::MissingRedirectTarget(operator)),
        };
        match operator {
            "<" => command.input = Some(path),
            ">" => {
                command.output = Some(OutputRedirect {
                    path,
                    mode: OutputMode::Truncate,
                })
            }
            _ => {
                command.output = Some(OutputRedirect {
                    path,
                    mode: OutputMode::Append,
                })
            }
        }
    }

    let mut words = words.into_iter();
    command.name = words.next().ok_or(ParseError::EmptyStage)?;
    command.args = words.collect();
    Ok(command)
}

/// Parses one command line into a pipeline.
pub fn parse(line: &str) -> Result<Pipeline, ParseError> {
    let mut tokens = tokenize(line)?;

    let background = tokens.last() == Some(&Token::Background);
    if background {
        tokens.pop();
    }
    if tokens.contains(&Token::Background) {
        return Err(ParseError::MisplacedBackground);
    }
    if tokens.is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let mut stages = vec![Vec::new()];
    for token in tokens {
        match token {
            Token::Pipe => stages.push(Vec::new()),
            token => {
                if let Some(stage) = stages.last_mut() {
                    stage.push(token);
                }
            }
        }
    }

    let commands = stages
        .into_iter()
        .map(parse_stage)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Pipeline {
        commands,
        background,
        text: line.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(command: &Command) -> Vec<&str> {
        std::iter::once(command.name.as_str())
            .chain(command.args.iter().map(String::as_str))
            .collect()
    }

    #[test]
    fn test_parser_splits_pipeline() {
        let pipeline = parse("cat jobs.txt | grep P1 | wc -l").unwrap();

        assert_eq!(pipeline.commands.len(), 3);
        assert_eq!(words(&pipeline.commands[0]), vec!["cat", "jobs.txt"]);
        assert_eq!(words(&pipeline.commands[2]), vec!["wc", "-l"]);
        assert!(!pipeline.background);
    }

    #[test]
    fn test_parser_quotes_and_escapes() {
        let pipeline = parse(r#"echo 'a | b' "say \"hi\" \n" c\ d pre"fix"'ed'"#).unwrap();

        assert_eq!(pipeline.commands.len(), 1);
        assert_eq!(
            pipeline.commands[0].args,
            vec!["a | b", "say \"hi\" \\n", "c d", "prefixed"]
        );

        let empty = parse("echo '' x").unwrap();
        assert_eq!(empty.commands[0].args, vec!["", "x"]);
    }

    #[test]
    fn test_parser_redirections_bind_to_their_stage() {
        let pipeline = parse("sort <in.txt | uniq >>out.txt").unwrap();

        assert_eq!(pipeline.commands[0].input.as_deref(), Some("in.txt"));
        assert_eq!(pipeline.commands[0].output, None);
        assert_eq!(
            pipeline.commands[1].output,
            Some(OutputRedirect {
                path: "out.txt".into(),
                mode: OutputMode::Append
            })
        );

        let spaced = parse("ls -l > listing").unwrap();
        assert_eq!(spaced.commands[0].output.as_ref().unwrap().mode, OutputMode::Truncate);
        assert_eq!(spaced.commands[0].args, vec!["-l"]);
    }

    #[test]
    fn test_parser_background_and_comments() {
        let pipeline = parse("schedule rr jobs.txt 2 & # later").unwrap();
        assert!(pipeline.background);
        assert_eq!(pipeline.commands[0].args, vec!["rr", "jobs.txt", "2"]);

        let hash = parse("echo a#b").unwrap();
        assert_eq!(hash.commands[0].args, vec!["a#b"]);
    }

    #[test]
    fn test_parser_errors() {
        assert_eq!(parse(""), Err(ParseError::EmptyLine));
        assert_eq!(parse("   \t"), Err(ParseError::EmptyLine));
        assert_eq!(parse("# just a comment"), Err(ParseError::EmptyLine));
        assert_eq!(parse("echo 'open"), Err(ParseError::UnterminatedQuote('\'')));
        assert_eq!(parse("echo \"open"), Err(ParseError::UnterminatedQuote('"')));
        assert_eq!(parse("cat >"), Err(ParseError::MissingRedirectTarget(">")));
        assert_eq!(parse("cat < | wc"), Err(ParseError::MissingRedirectTarget("<")));
        assert_eq!(parse("| wc"), Err(ParseError::EmptyStage));
        assert_eq!(parse("ls |"), Err(ParseError::EmptyStage));
        assert_eq!(parse("ls || wc"), Err(ParseError::EmptyStage));
        assert_eq!(parse("> out"), Err(ParseError::EmptyStage));
        assert_eq!(parse("sleep 1 & ls"), Err(ParseError::MisplacedBackground));
        assert_eq!(parse("ls & &"), Err(ParseError::MisplacedBackground));
    }
}
