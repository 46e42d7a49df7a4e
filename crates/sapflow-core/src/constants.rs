/// Workflow configuration constants

/// Configuration file used when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "configs.json";

/// Collection that receives error records
pub const DEFAULT_ERRORS_COLLECTION: &str = "process_errors";

/// Uniqueness field for upserts
pub const DEFAULT_UNIQUE_KEY: &str = "_id";

/// Status every new error record starts with
pub const ERROR_STATUS_PENDING: &str = "pending";

// Input spreadsheet defaults
pub const DEFAULT_INPUT_PATH: &str = "resources/VendasSAP.xlsx";
pub const DEFAULT_ORDER_COLUMN: &str = "Ordem";

// OpenIAP gateway
pub const OPENIAP_URL_ENV: &str = "apiurl";
pub const OPENIAP_JWT_ENV: &str = "jwt";
pub const OPENIAP_DEFAULT_URL: &str = "https://app.openiap.io";
pub const OPENIAP_SIGNIN_PATH: &str = "/api/signin";
pub const OPENIAP_QUERY_PATH: &str = "/api/query";
pub const OPENIAP_UPSERT_PATH: &str = "/api/insertorupdatemany";
pub const OPENIAP_DELETE_PATH: &str = "/api/deletemany";
pub const OPENIAP_SIGNOUT_PATH: &str = "/api/signout";

/// Text of the SAP popup shown when the user already has an open logon
pub const MULTI_LOGON_MARKER: &str = "logon múltiplo";

/// SMS payloads are cut to a single segment
pub const SMS_MAX_LEN: usize = 160;
