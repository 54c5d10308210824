//! Constants used throughout Pieceflow

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "pieceflow.config.json";

/// Default SQLite DSN
pub const DEFAULT_SQLITE_DSN: &str = ".pieceflow/pieceflow.db";

/// Default timeout for piece registry requests, in seconds
pub const DEFAULT_PIECES_TIMEOUT_SECS: u64 = 10;

/// Default base URL webhooks are exposed under
pub const DEFAULT_WEBHOOK_BASE_URL: &str = "http://localhost:3000";

/// Environment variable overrides
pub const ENV_STORAGE_DRIVER: &str = "PIECEFLOW_STORAGE_DRIVER";
pub const ENV_STORAGE_DSN: &str = "PIECEFLOW_STORAGE_DSN";
pub const ENV_PIECES_URL: &str = "PIECEFLOW_PIECES_URL";
pub const ENV_LOG_LEVEL: &str = "PIECEFLOW_LOG_LEVEL";

// ============================================================================
// FLOW STRUCTURE
// ============================================================================

/// Name of the root trigger step
pub const TRIGGER_STEP_NAME: &str = "trigger";

/// Display name of the placeholder trigger
pub const EMPTY_TRIGGER_DISPLAY_NAME: &str = "Select Trigger";

/// Prefix of generated action names (`step_1`, `step_2`, ...)
pub const STEP_NAME_PREFIX: &str = "step";

/// Input key holding the piece auth value
pub const AUTH_PROP_NAME: &str = "auth";

/// Piece whose steps reference agents
pub const AGENT_PIECE_NAME: &str = "@activepieces/piece-agent";

/// Input key of the agent reference on agent piece steps
pub const AGENT_ID_INPUT: &str = "agentId";

/// Namespace prefix of official pieces
pub const OFFICIAL_PIECE_PREFIX: &str = "@activepieces/piece-";

// ============================================================================
// SCHEMA
// ============================================================================

/// Schema version written by this build
pub const LATEST_SCHEMA_VERSION: u32 = 3;

// ============================================================================
// TRIGGERS & JOBS
// ============================================================================

/// Polling cadence used when neither the piece nor the user sets one
pub const DEFAULT_POLLING_CRON: &str = "*/5 * * * *";

/// Timezone used for schedules without one
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Window size of job backfills
pub const DEFAULT_MIGRATION_BATCH_SIZE: usize = 1000;

/// Page size when scanning trigger sources
pub const TRIGGER_SOURCE_PAGE_SIZE: usize = 500;

/// Marker recorded once the execute-flow job backfill has completed
pub const FLOW_JOB_BACKFILL_MARKER: &str = "execute-flow-jobs-flow-id-backfill";

/// Default page size of version history listings
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Hard cap on version history page size
pub const MAX_LIST_LIMIT: usize = 100;
