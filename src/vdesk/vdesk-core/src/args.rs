/*
 * vDesk customer support engine
 * Copyright (C) 2023 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// vDesk conversation core
#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Path of a JSON configuration file; the environment overrides it.
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    pub check: bool,

    /// Also log to stdout.
    #[arg(long)]
    pub stdout: bool,

    /// Log file; when absent everything goes to stdout.
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_the_eval_invocation() {
        let args = Args::parse_from(["vdesk", "--config", "/etc/vdesk.json", "--stdout"]);
        assert_eq!(
            args.config.as_deref(),
            Some(std::path::Path::new("/etc/vdesk.json"))
        );
        assert!(args.stdout);
        assert!(!args.check);
    }
}
