/// A persisted rule. `definition` holds the JSON rule body.
#[derive(Debug, Clone)]
pub struct RuleRow {
    pub id: i64,
    pub name: String,
    pub definition: String,
    pub priority: i64,
    pub enabled: bool,
    pub match_count: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CheckpointRow {
    pub id: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub action_kind: String,
    pub description: String,
    pub state: String,
    pub total_bytes: i64,
    pub blob_dir: String,
}

#[derive(Debug, Clone)]
pub struct CheckpointEntryRow {
    pub seq: i64,
    pub original_path: String,
    pub change_kind: String,
    pub blob_path: String,
    pub size: i64,
    /// XxHash64 of the backed-up bytes, stored bit-for-bit as i64.
    pub checksum: i64,
    pub modified_ns: i64,
    pub accessed_ns: i64,
    pub mode: Option<i64>,
    pub readonly: bool,
    pub artifact_path: Option<String>,
    pub applied: bool,
    pub restored: bool,
}
