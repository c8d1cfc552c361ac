use anyhow::{Context, Result};
use calcache_core::bulk;
use owo_colors::OwoColorize;

use crate::app::App;

pub async fn run(app: &App, paths: Vec<String>, parallel: Option<usize>) -> Result<()> {
    let paths = if paths.is_empty() {
        let input = std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?;
        parse_path_list(&input)
    } else {
        paths
    };

    if paths.is_empty() {
        anyhow::bail!("No paths given. Pass them as arguments or one per line on stdin.");
    }

    let count = paths.len();
    bulk::delete_events(app.remote()?, paths, app.parallelism(parallel), &app.cancel).await?;
    eprintln!("{}", format!("Deleted {count} event(s)").green());
    Ok(())
}

fn parse_path_list(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        let paths = parse_path_list("/cal/a.ics\n\n  /cal/b.ics  \n");
        assert_eq!(paths, vec!["/cal/a.ics", "/cal/b.ics"]);
    }
}
