//! Command-line configuration parsing.
//!
//! Everything before the first `--` belongs to the proxy (handled by
//! clap); everything after it is backend command groups separated by
//! further `--` tokens, which clap cannot express and are split here.

use std::collections::HashMap;

use anyhow::bail;

/// The capability keys the provider table accepts.
pub const PROVIDER_KEYS: [&str; 6] = [
    "hover",
    "completion",
    "definition",
    "rename",
    "references",
    "diagnostic",
];

/// Split the arguments after the first `--` into per-backend commands.
/// Groups whose first token is the empty string are skipped.
pub fn split_command_groups(args: &[String]) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    let mut current = Vec::new();
    for arg in args {
        if arg == "--" {
            if !current.is_empty() {
                commands.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(arg.clone());
    }
    if !current.is_empty() {
        commands.push(current);
    }
    commands.retain(|command| !command[0].is_empty());
    commands
}

/// Parse repeated `KEY=SEL[,SEL...]` flags into the provider table.
pub fn parse_providers(entries: &[String]) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut providers = HashMap::new();
    for entry in entries {
        let Some((key, selectors)) = entry.split_once('=') else {
            bail!("invalid provider {:?}, expected KEY=SEL[,SEL...]", entry);
        };
        if !PROVIDER_KEYS.contains(&key) {
            bail!(
                "unknown provider key {:?}, expected one of {}",
                key,
                PROVIDER_KEYS.join(", ")
            );
        }
        providers.insert(
            key.to_string(),
            selectors.split(',').map(str::to_string).collect(),
        );
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn groups_split_on_double_dash() {
        let commands = split_command_groups(&args(&["clangd", "--log=off", "--", "tsserver"]));
        assert_eq!(
            commands,
            vec![
                vec!["clangd".to_string(), "--log=off".to_string()],
                vec!["tsserver".to_string()]
            ]
        );
    }

    #[test]
    fn leading_and_trailing_separators_produce_no_groups() {
        let commands = split_command_groups(&args(&["--", "clangd", "--"]));
        assert_eq!(commands, vec![vec!["clangd".to_string()]]);
    }

    #[test]
    fn empty_first_token_skips_the_group() {
        let commands = split_command_groups(&args(&["", "ignored", "--", "clangd"]));
        assert_eq!(commands, vec![vec!["clangd".to_string()]]);
    }

    #[test]
    fn no_arguments_means_no_commands() {
        assert!(split_command_groups(&[]).is_empty());
    }

    #[test]
    fn providers_parse_keys_and_selector_lists() {
        let providers =
            parse_providers(&args(&["hover=0,tsserver", "completion=clangd"])).unwrap();
        assert_eq!(
            providers["hover"],
            vec!["0".to_string(), "tsserver".to_string()]
        );
        assert_eq!(providers["completion"], vec!["clangd".to_string()]);
    }

    #[test]
    fn provider_without_equals_is_rejected() {
        assert!(parse_providers(&args(&["hover"])).is_err());
    }

    #[test]
    fn unknown_provider_key_is_rejected() {
        assert!(parse_providers(&args(&["format=0"])).is_err());
    }
}
