//! Default values for configuration fields, matching the defaults named in
//! spec §6's configuration surface table.

pub fn default_database_url() -> String {
    "sqlite://~/.castpilot/castpilot.db".to_string()
}

pub fn default_encryption_salt() -> String {
    "castpilot-default-salt-change-me".to_string()
}

pub fn default_scheduler_tick_ms() -> u64 {
    30_000
}

pub fn default_dispatcher_concurrency() -> usize {
    4
}

pub fn default_publish_deadline_ms() -> u64 {
    1_800_000
}
