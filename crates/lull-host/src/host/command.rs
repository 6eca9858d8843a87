//! Parsing of the line protocol read from stdin.
//!
//! ```text
//! sleep <ms>          dispatch a job that sleeps
//! echo <text>         dispatch a job that prints <text>
//! fail <text>         dispatch a job that fails with <text>
//! cancel <id>         cancel an outstanding job
//! idle <ms>           change the idle period
//! auto-close on|off   toggle auto-close
//! ```

use super::job::Job;
use anyhow::{Context, anyhow, bail};
use core::{str::FromStr, time::Duration};
use lull::TaskId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(Job),
    Cancel(TaskId),
    Idle(Duration),
    AutoClose(bool),
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

        let command = match verb {
            "sleep" => Self::Run(Job::Sleep(millis(rest)?)),
            "echo" => Self::Run(Job::Echo(rest.to_string())),
            "fail" => Self::Run(Job::Fail(non_empty(rest, "fail")?.to_string())),
            "cancel" => {
                let raw: u64 = non_empty(rest, "cancel")?
                    .parse()
                    .with_context(|| format!("invalid task id `{rest}`"))?;
                Self::Cancel(TaskId::from_raw(raw))
            }
            "idle" => Self::Idle(millis(rest)?),
            "auto-close" => match rest {
                "on" => Self::AutoClose(true),
                "off" => Self::AutoClose(false),
                other => bail!("expected `on` or `off`, got `{other}`"),
            },
            "" => bail!("empty command"),
            other => bail!("unknown command `{other}`"),
        };
        Ok(command)
    }
}

fn millis(raw: &str) -> anyhow::Result<Duration> {
    raw.parse()
        .map(Duration::from_millis)
        .with_context(|| format!("invalid milliseconds `{raw}`"))
}

fn non_empty<'a>(raw: &'a str, verb: &str) -> anyhow::Result<&'a str> {
    if raw.is_empty() {
        return Err(anyhow!("`{verb}` needs an argument"));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_verb() {
        assert_eq!(
            "sleep 250".parse::<Command>().unwrap(),
            Command::Run(Job::Sleep(Duration::from_millis(250)))
        );
        assert_eq!(
            "echo  hello world ".parse::<Command>().unwrap(),
            Command::Run(Job::Echo("hello world".to_string()))
        );
        assert_eq!(
            "fail disk full".parse::<Command>().unwrap(),
            Command::Run(Job::Fail("disk full".to_string()))
        );
        assert_eq!(
            "cancel 7".parse::<Command>().unwrap(),
            Command::Cancel(TaskId::from_raw(7))
        );
        assert_eq!(
            "idle 1000".parse::<Command>().unwrap(),
            Command::Idle(Duration::from_secs(1))
        );
        assert_eq!(
            "auto-close off".parse::<Command>().unwrap(),
            Command::AutoClose(false)
        );
    }

    #[test]
    fn echo_without_text_is_allowed() {
        assert_eq!(
            "echo".parse::<Command>().unwrap(),
            Command::Run(Job::Echo(String::new()))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "",
            "   ",
            "launch 5",
            "sleep",
            "sleep soon",
            "cancel",
            "cancel -1",
            "fail",
            "auto-close maybe",
        ] {
            assert!(line.parse::<Command>().is_err(), "accepted {line:?}");
        }
    }
}
