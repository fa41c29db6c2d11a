//! Connection-related data models.
//!
//! [`ConnectionInfo`] is the reconnection recipe for a registered database.
//! It is what gets persisted and what a live handle is opened from.

use serde::{Deserialize, Serialize};

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    #[serde(rename = "postgres", alias = "postgresql")]
    PostgreSQL,
    /// Includes MariaDB
    #[serde(rename = "mysql", alias = "mariadb")]
    MySQL,
    #[serde(rename = "sqlite", alias = "sqlite3")]
    SQLite,
}

impl DriverKind {
    /// Every driver this build can open.
    pub fn all() -> &'static [DriverKind] {
        &[Self::PostgreSQL, Self::MySQL, Self::SQLite]
    }

    /// Stable name used in persisted records and the HTTP API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// Parse a persisted driver name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" | "sqlite3" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Detect the driver from a connection URL.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Everything needed to (re)open a registered connection.
///
/// For SQLite, `database_name` is the database file path and the network
/// fields are ignored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Operator-facing label.
    pub name: String,
    pub driver: DriverKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, rename = "dbUser")]
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(rename = "dbName")]
    pub database_name: String,
}

impl ConnectionInfo {
    /// A SQLite connection backed by the file at `path`.
    pub fn sqlite(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: DriverKind::SQLite,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database_name: path.into(),
        }
    }

    /// A networked connection; the port falls back to the driver default when zero.
    pub fn network(
        name: impl Into<String>,
        driver: DriverKind,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database_name: database_name.into(),
        }
    }

    /// Port to dial, substituting the driver default for an unset port.
    pub fn effective_port(&self) -> u16 {
        match (self.port, self.driver.default_port()) {
            (0, Some(default)) => default,
            (port, _) => port,
        }
    }

    /// Human-readable endpoint without credentials, suitable for logs.
    pub fn endpoint(&self) -> String {
        match self.driver {
            DriverKind::SQLite => format!("sqlite:{}", self.database_name),
            driver => format!(
                "{}://{}@{}:{}/{}",
                driver.as_str(),
                self.user,
                self.host,
                self.effective_port(),
                self.database_name
            ),
        }
    }
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("database_name", &self.database_name)
            .finish()
    }
}

/// A registered connection as reported by listings (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    #[serde(flatten)]
    pub info: ConnectionInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_from_connection_string() {
        assert_eq!(
            DriverKind::from_connection_string("postgres://u@h/db"),
            Some(DriverKind::PostgreSQL)
        );
        assert_eq!(
            DriverKind::from_connection_string("mariadb://u@h/db"),
            Some(DriverKind::MySQL)
        );
        assert_eq!(
            DriverKind::from_connection_string("sqlite:data.db"),
            Some(DriverKind::SQLite)
        );
        assert_eq!(DriverKind::from_connection_string("oracle://x"), None);
    }

    #[test]
    fn test_driver_names_round_trip() {
        for driver in DriverKind::all() {
            assert_eq!(DriverKind::from_name(driver.as_str()), Some(*driver));
        }
        assert_eq!(DriverKind::from_name("PostgreSQL"), Some(DriverKind::PostgreSQL));
        assert_eq!(DriverKind::from_name("oracle"), None);
    }

    #[test]
    fn test_info_json_shape() {
        let info = ConnectionInfo::network(
            "reporting",
            DriverKind::PostgreSQL,
            "db.internal",
            0,
            "reader",
            "hunter2",
            "sales",
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "reporting");
        assert_eq!(json["driver"], "postgres");
        assert_eq!(json["dbUser"], "reader");
        assert_eq!(json["dbName"], "sales");
        assert!(json.get("password").is_none());
    }

    #[test]
    fn test_info_deserializes_password() {
        let info: ConnectionInfo = serde_json::from_str(
            r#"{"name":"a","driver":"mysql","host":"h","port":3307,"dbUser":"u","password":"p","dbName":"d"}"#,
        )
        .unwrap();
        assert_eq!(info.password, "p");
        assert_eq!(info.driver, DriverKind::MySQL);
        assert_eq!(info.effective_port(), 3307);
    }

    #[test]
    fn test_debug_masks_password() {
        let info = ConnectionInfo::network("a", DriverKind::MySQL, "h", 0, "u", "s3cret", "d");
        let debug = format!("{:?}", info);
        assert!(!debug.contains("s3cret"));
        assert_eq!(info.effective_port(), 3306);
        assert_eq!(info.endpoint(), "mysql://u@h:3306/d");
    }

    #[test]
    fn test_summary_flattens_info() {
        let summary = ConnectionSummary {
            id: "abc".to_string(),
            info: ConnectionInfo::sqlite("local", "/tmp/x.db"),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["dbName"], "/tmp/x.db");
        assert_eq!(json["driver"], "sqlite");
    }
}
