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

use std::collections::HashMap;
use vdesk_config::Config;

/// Get a config for local test.
///
/// # Panics
///
/// * config cannot be built
#[must_use]
pub fn local_test() -> Config {
    let env: HashMap<String, String> = [
        ("DATABASE_URL", "memory://local"),
        ("JWT_SECRET", "local-test-jwt"),
        ("MASTER_ENCRYPTION_KEY", "test-master-key"),
        ("BLOB_BUCKET", "attachments"),
        ("BLOB_ACCESS_KEY", "local"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), value.to_owned()))
    .collect();

    Config::from_lookup(&env).unwrap()
}

/// Same, with the filtered-mail audit rows switched on.
#[must_use]
pub fn local_test_logging_filtered() -> Config {
    let mut config = local_test();
    config.filter.log_filtered = true;
    config
}
