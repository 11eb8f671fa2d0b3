//! Typed Dockerfile instruction AST and the line-level parser behind it.
//!
//! One closed enum covers the 17 supported verbs. Each variant keeps just
//! enough structure for execution; [`Instruction::text`] reconstructs the
//! canonical one-line form used for history entries and cache keys.

use crate::error::{Error, Result};
use crate::image::HealthCheck;

/// A single parsed Dockerfile instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    From {
        image: String,
        alias: Option<String>,
    },
    Run {
        cmdline: Vec<String>,
        /// Shell form (`RUN echo hi`) as opposed to exec form (`RUN ["echo"]`).
        prepend_shell: bool,
    },
    Copy {
        sources: Vec<String>,
        dest: String,
        from: Option<String>,
        chown: Option<String>,
    },
    Add {
        sources: Vec<String>,
        dest: String,
        chown: Option<String>,
    },
    Env(Vec<(String, String)>),
    Arg {
        key: String,
        default: Option<String>,
    },
    Workdir(String),
    User(String),
    Expose(Vec<String>),
    Volume(Vec<String>),
    Cmd {
        cmdline: Vec<String>,
        prepend_shell: bool,
    },
    Entrypoint {
        cmdline: Vec<String>,
        prepend_shell: bool,
    },
    Label(Vec<(String, String)>),
    Maintainer(String),
    Shell(Vec<String>),
    Healthcheck(HealthCheck),
    StopSignal(String),
    /// The trigger expression is kept raw and re-parsed when a downstream
    /// build consumes the image.
    Onbuild(String),
}

impl Instruction {
    /// Parses one logical (continuation-joined) Dockerfile line.
    pub fn parse(line: &str) -> Result<Instruction> {
        let line = line.trim();
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((k, r)) => (k.to_ascii_uppercase(), r.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };

        match keyword.as_str() {
            "FROM" => parse_from(rest),
            "RUN" => {
                let (cmdline, prepend_shell) = parse_command_line(rest)?;
                Ok(Instruction::Run {
                    cmdline,
                    prepend_shell,
                })
            }
            "COPY" => parse_copy(rest),
            "ADD" => parse_add(rest),
            "ENV" => Ok(Instruction::Env(parse_key_values(rest, "ENV")?)),
            "ARG" => parse_arg(rest),
            "WORKDIR" => Ok(Instruction::Workdir(rest.to_string())),
            "USER" => Ok(Instruction::User(rest.to_string())),
            "EXPOSE" => Ok(Instruction::Expose(split_words(rest)?)),
            "VOLUME" => parse_volume(rest),
            "CMD" => {
                let (cmdline, prepend_shell) = parse_command_line(rest)?;
                Ok(Instruction::Cmd {
                    cmdline,
                    prepend_shell,
                })
            }
            "ENTRYPOINT" => {
                let (cmdline, prepend_shell) = parse_command_line(rest)?;
                Ok(Instruction::Entrypoint {
                    cmdline,
                    prepend_shell,
                })
            }
            "LABEL" => Ok(Instruction::Label(parse_key_values(rest, "LABEL")?)),
            "MAINTAINER" => Ok(Instruction::Maintainer(rest.to_string())),
            "SHELL" => match parse_json_array(rest) {
                Some(words) => Ok(Instruction::Shell(words)),
                None => Err(Error::Parse {
                    reason: format!("SHELL requires the JSON array form: {rest}"),
                }),
            },
            "HEALTHCHECK" => parse_healthcheck(rest),
            "STOPSIGNAL" => Ok(Instruction::StopSignal(rest.to_string())),
            "ONBUILD" => {
                if rest
                    .split_whitespace()
                    .next()
                    .is_some_and(|w| w.eq_ignore_ascii_case("ONBUILD"))
                {
                    return Err(Error::Parse {
                        reason: "chaining ONBUILD via `ONBUILD ONBUILD` is not allowed".to_string(),
                    });
                }
                Ok(Instruction::Onbuild(rest.to_string()))
            }
            other => Err(Error::Parse {
                reason: format!("{other} is not a supported instruction"),
            }),
        }
    }

    /// Canonical single-line form, used for history records and cache keys.
    pub fn text(&self) -> String {
        match self {
            Instruction::From { image, alias } => match alias {
                Some(alias) => format!("FROM {image} AS {alias}"),
                None => format!("FROM {image}"),
            },
            Instruction::Run {
                cmdline,
                prepend_shell,
            } => format_command("RUN", cmdline, *prepend_shell),
            Instruction::Copy {
                sources,
                dest,
                from,
                chown,
            } => {
                let mut parts = vec!["COPY".to_string()];
                if let Some(from) = from {
                    parts.push(format!("--from={from}"));
                }
                if let Some(chown) = chown {
                    parts.push(format!("--chown={chown}"));
                }
                parts.extend(sources.iter().cloned());
                parts.push(dest.clone());
                parts.join(" ")
            }
            Instruction::Add {
                sources,
                dest,
                chown,
            } => {
                let mut parts = vec!["ADD".to_string()];
                if let Some(chown) = chown {
                    parts.push(format!("--chown={chown}"));
                }
                parts.extend(sources.iter().cloned());
                parts.push(dest.clone());
                parts.join(" ")
            }
            Instruction::Env(pairs) => format!("ENV {}", join_pairs(pairs)),
            Instruction::Arg { key, default } => match default {
                Some(default) => format!("ARG {key}={default}"),
                None => format!("ARG {key}"),
            },
            Instruction::Workdir(path) => format!("WORKDIR {path}"),
            Instruction::User(user) => format!("USER {user}"),
            Instruction::Expose(ports) => format!("EXPOSE {}", ports.join(" ")),
            Instruction::Volume(paths) => format!("VOLUME {}", paths.join(" ")),
            Instruction::Cmd {
                cmdline,
                prepend_shell,
            } => format_command("CMD", cmdline, *prepend_shell),
            Instruction::Entrypoint {
                cmdline,
                prepend_shell,
            } => format_command("ENTRYPOINT", cmdline, *prepend_shell),
            Instruction::Label(pairs) => format!("LABEL {}", join_pairs(pairs)),
            Instruction::Maintainer(name) => format!("MAINTAINER {name}"),
            Instruction::Shell(words) => format_command("SHELL", words, false),
            Instruction::Healthcheck(hc) => {
                if hc.test.first().map(String::as_str) == Some("NONE") {
                    "HEALTHCHECK NONE".to_string()
                } else {
                    format!("HEALTHCHECK CMD {}", hc.test[1..].join(" "))
                }
            }
            Instruction::StopSignal(signal) => format!("STOPSIGNAL {signal}"),
            Instruction::Onbuild(expr) => format!("ONBUILD {expr}"),
        }
    }
}

fn format_command(keyword: &str, cmdline: &[String], prepend_shell: bool) -> String {
    if prepend_shell {
        format!("{keyword} {}", cmdline.join(" "))
    } else {
        let quoted: Vec<String> = cmdline.iter().map(|w| format!("\"{w}\"")).collect();
        format!("{keyword} [{}]", quoted.join(","))
    }
}

fn join_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_from(rest: &str) -> Result<Instruction> {
    let words: Vec<&str> = rest.split_whitespace().collect();
    match words.as_slice() {
        [image] => Ok(Instruction::From {
            image: image.to_string(),
            alias: None,
        }),
        [image, kw, alias] if kw.eq_ignore_ascii_case("as") => Ok(Instruction::From {
            image: image.to_string(),
            alias: Some(alias.to_string()),
        }),
        _ => Err(Error::Parse {
            reason: format!("malformed FROM: {rest}"),
        }),
    }
}

fn parse_arg(rest: &str) -> Result<Instruction> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(Error::Parse {
            reason: "ARG requires a name".to_string(),
        });
    }
    match rest.split_once('=') {
        Some((key, default)) => Ok(Instruction::Arg {
            key: key.to_string(),
            default: Some(unquote(default)),
        }),
        None => Ok(Instruction::Arg {
            key: rest.to_string(),
            default: None,
        }),
    }
}

fn parse_volume(rest: &str) -> Result<Instruction> {
    let paths = match parse_json_array(rest) {
        Some(paths) => paths,
        None => split_words(rest)?,
    };
    if paths.is_empty() {
        return Err(Error::Parse {
            reason: "VOLUME requires at least one path".to_string(),
        });
    }
    Ok(Instruction::Volume(paths))
}

fn parse_copy(rest: &str) -> Result<Instruction> {
    let (flags, words) = split_flags(rest)?;
    let mut from = None;
    let mut chown = None;
    for (name, value) in flags {
        match name.as_str() {
            "from" => from = Some(value),
            "chown" => chown = Some(value),
            other => {
                return Err(Error::Parse {
                    reason: format!("unknown COPY flag --{other}"),
                })
            }
        }
    }
    let (sources, dest) = split_sources_dest(words, "COPY")?;
    Ok(Instruction::Copy {
        sources,
        dest,
        from,
        chown,
    })
}

fn parse_add(rest: &str) -> Result<Instruction> {
    let (flags, words) = split_flags(rest)?;
    let mut chown = None;
    for (name, value) in flags {
        match name.as_str() {
            "chown" => chown = Some(value),
            other => {
                return Err(Error::Parse {
                    reason: format!("unknown ADD flag --{other}"),
                })
            }
        }
    }
    let (sources, dest) = split_sources_dest(words, "ADD")?;
    Ok(Instruction::Add {
        sources,
        dest,
        chown,
    })
}

fn split_sources_dest(words: Vec<String>, keyword: &str) -> Result<(Vec<String>, String)> {
    if words.len() < 2 {
        return Err(Error::Parse {
            reason: format!("{keyword} requires at least one source and a destination"),
        });
    }
    let mut sources = words;
    let dest = sources.pop().expect("length checked above");
    Ok((sources, dest))
}

fn parse_healthcheck(rest: &str) -> Result<Instruction> {
    if rest.trim().eq_ignore_ascii_case("none") {
        return Ok(Instruction::Healthcheck(HealthCheck {
            test: vec!["NONE".to_string()],
            ..Default::default()
        }));
    }

    let (flags, words) = split_flags(rest)?;
    let mut hc = HealthCheck::default();
    for (name, value) in flags {
        match name.as_str() {
            "interval" => hc.interval = Some(parse_duration_nanos(&value)?),
            "timeout" => hc.timeout = Some(parse_duration_nanos(&value)?),
            "start-period" => hc.start_period = Some(parse_duration_nanos(&value)?),
            "retries" => {
                hc.retries = Some(value.parse().map_err(|_| Error::Parse {
                    reason: format!("invalid retries value: {value}"),
                })?)
            }
            other => {
                return Err(Error::Parse {
                    reason: format!("unknown HEALTHCHECK flag --{other}"),
                })
            }
        }
    }

    match words.split_first() {
        Some((kw, cmd)) if kw.eq_ignore_ascii_case("cmd") => {
            let mut test = vec!["CMD-SHELL".to_string()];
            test.push(cmd.join(" "));
            hc.test = test;
            Ok(Instruction::Healthcheck(hc))
        }
        _ => Err(Error::Parse {
            reason: format!("HEALTHCHECK expects CMD or NONE: {rest}"),
        }),
    }
}

/// Parses a `30s` / `2m` / `1h` duration into nanoseconds.
fn parse_duration_nanos(value: &str) -> Result<i64> {
    let (number, unit) = value.split_at(value.len().saturating_sub(1));
    let seconds: i64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => {
            return Err(Error::Parse {
                reason: format!("invalid duration: {value}"),
            })
        }
    };
    let number: i64 = number.parse().map_err(|_| Error::Parse {
        reason: format!("invalid duration: {value}"),
    })?;
    Ok(number * seconds * 1_000_000_000)
}

/// Splits leading `--name=value` flags off an instruction body.
fn split_flags(rest: &str) -> Result<(Vec<(String, String)>, Vec<String>)> {
    let mut flags = Vec::new();
    let mut words = split_words(rest)?;
    while let Some(first) = words.first() {
        let Some(flag) = first.strip_prefix("--") else {
            break;
        };
        let Some((name, value)) = flag.split_once('=') else {
            return Err(Error::Parse {
                reason: format!("flag --{flag} requires =value"),
            });
        };
        flags.push((name.to_string(), value.to_string()));
        words.remove(0);
    }
    Ok((flags, words))
}

/// RUN/CMD/ENTRYPOINT body: JSON array → exec form, anything else → shell
/// form kept as a single joined command line.
fn parse_command_line(rest: &str) -> Result<(Vec<String>, bool)> {
    if let Some(words) = parse_json_array(rest) {
        return Ok((words, false));
    }
    Ok((vec![rest.to_string()], true))
}

/// Attempts to read the body as a JSON string array (`["a","b"]`).
fn parse_json_array(rest: &str) -> Option<Vec<String>> {
    let rest = rest.trim();
    if !rest.starts_with('[') {
        return None;
    }
    serde_json::from_str::<Vec<String>>(rest).ok()
}

/// Parses `k=v k2="v 2"` and legacy `k v...` bodies for ENV/LABEL.
fn parse_key_values(rest: &str, keyword: &str) -> Result<Vec<(String, String)>> {
    let words = split_words(rest)?;
    if words.is_empty() {
        return Err(Error::Parse {
            reason: format!("{keyword} requires at least one key"),
        });
    }

    // Legacy space form: `ENV key value with spaces`.
    if !words[0].contains('=') {
        let (key, value) = rest.split_once(char::is_whitespace).ok_or(Error::Parse {
            reason: format!("{keyword} {rest} has no value"),
        })?;
        return Ok(vec![(key.to_string(), unquote(value.trim()))]);
    }

    let mut pairs = Vec::with_capacity(words.len());
    for word in words {
        let (key, value) = word.split_once('=').ok_or_else(|| Error::Parse {
            reason: format!("{keyword} entry '{word}' is not key=value"),
        })?;
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

/// Splits a body into words honoring single/double quotes and backslash
/// escapes. Quotes are stripped; escapes inside double quotes are resolved.
pub fn split_words(body: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                in_word = true;
                let quote = c;
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some('\\') if quote == '"' => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(Error::Parse {
                                    reason: format!("dangling escape in: {body}"),
                                })
                            }
                        },
                        Some(c) => current.push(c),
                        None => {
                            return Err(Error::Parse {
                                reason: format!("unterminated quote in: {body}"),
                            })
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(Error::Parse {
                            reason: format!("dangling escape in: {body}"),
                        })
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}
