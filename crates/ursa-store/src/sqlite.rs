//! SQLite implementation of the [`Store`] trait.
//!
//! Uses WAL mode for concurrent reads with serialized writes. Address
//! columns hold the canonical text forms from `ursa-types`; the allocator
//! compares addresses numerically in process, never via SQL text ordering.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use ursa_types::{
    Cidr, Host, Ipv4, Lease, LeaseAddress, MacAddr, SshKey, Subnet, SubnetId, User,
};

use crate::error::{map_sqlx, Result, StoreError};
use crate::Store;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS subnet (
        id INTEGER PRIMARY KEY,
        network TEXT NOT NULL UNIQUE,
        start TEXT NOT NULL UNIQUE,
        "end" TEXT NOT NULL UNIQUE,
        gateway TEXT,
        dns_server TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lease (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mac_address TEXT NOT NULL,
        ip_address TEXT NOT NULL,
        subnet_id INTEGER NOT NULL,
        UNIQUE(mac_address, subnet_id),
        UNIQUE(ip_address, subnet_id),
        FOREIGN KEY(subnet_id) REFERENCES subnet(id) ON DELETE RESTRICT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS host (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        serial TEXT NOT NULL DEFAULT '',
        product TEXT NOT NULL DEFAULT '',
        manufacturer TEXT NOT NULL DEFAULT '',
        service_lease_id INTEGER NOT NULL UNIQUE,
        management_lease_id INTEGER NOT NULL UNIQUE,
        FOREIGN KEY(service_lease_id) REFERENCES lease(id) ON DELETE RESTRICT,
        FOREIGN KEY(management_lease_id) REFERENCES lease(id) ON DELETE RESTRICT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS key (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        FOREIGN KEY(user_id) REFERENCES user(id) ON DELETE RESTRICT
    )
    "#,
];

/// SQLite-backed store.
///
/// Lease allocation and host registration take a process-local write lock
/// on top of their transactions so the DHCP and HTTP daemons cannot race
/// each other allocating for the same MAC.
pub struct SqliteStore {
    pool: SqlitePool,
    hostname_prefix: String,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) the database behind `dsn`, e.g.
    /// `sqlite:ursa.db?cache=shared`, and ensure the schema exists.
    pub async fn open(dsn: &str, hostname_prefix: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        for table in SCHEMA {
            sqlx::query(table).execute(&pool).await.map_err(map_sqlx)?;
        }

        info!(dsn = %dsn, "sqlite store opened");
        Ok(Self {
            pool,
            hostname_prefix: hostname_prefix.into(),
            write_lock: Mutex::new(()),
        })
    }

    async fn subnet(&self, id: SubnetId) -> Result<Subnet> {
        let row = sqlx::query(
            r#"SELECT id, network, start, "end", gateway, dns_server FROM subnet WHERE id = ?"#,
        )
        .bind(id.row_id())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StoreError::NotFound(format!("subnet {}", id.row_id())))?;

        subnet_from_row(&row)
    }

    async fn create_subnet(&self, subnet: Subnet) -> Result<Subnet> {
        sqlx::query(
            r#"INSERT INTO subnet (id, network, start, "end", gateway, dns_server)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(subnet.id)
        .bind(subnet.network.to_string())
        .bind(subnet.start.to_string())
        .bind(subnet.end.to_string())
        .bind(subnet.gateway.map(|g| g.to_string()))
        .bind(subnet.dns_server.map(|d| d.to_string()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(subnet)
    }

    async fn lease(&self, mac: MacAddr, id: SubnetId) -> Result<Lease> {
        let row = sqlx::query(
            "SELECT id, mac_address, ip_address, subnet_id FROM lease \
             WHERE mac_address = ? AND subnet_id = ?",
        )
        .bind(mac.to_string())
        .bind(id.row_id())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| {
            StoreError::NotFound(format!("lease for {mac} in subnet {}", id.row_id()))
        })?;

        lease_from_row(&row)
    }

    /// Deterministic monotonic allocation: the next address is the numeric
    /// successor of the highest address already granted in the subnet, or
    /// `start` for the first lease. The insert and the scan share one
    /// transaction under the write lock.
    async fn create_lease(&self, mac: MacAddr, id: SubnetId) -> Result<Lease> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let subnet_row = sqlx::query(
            r#"SELECT id, network, start, "end", gateway, dns_server FROM subnet WHERE id = ?"#,
        )
        .bind(id.row_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StoreError::NotFound(format!("subnet {}", id.row_id())))?;
        let subnet = subnet_from_row(&subnet_row)?;

        let rows = sqlx::query("SELECT ip_address FROM lease WHERE subnet_id = ?")
            .bind(id.row_id())
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let mut highest: Option<Ipv4> = None;
        for row in &rows {
            let ip = parse_col::<Ipv4>(&row.get::<String, _>("ip_address"), "lease.ip_address")?;
            highest = Some(match highest {
                Some(cur) if cur >= ip => cur,
                _ => ip,
            });
        }

        let next = match highest {
            None => subnet.start,
            Some(ip) => ip.next(),
        };
        if next > subnet.end {
            return Err(StoreError::PoolExhausted {
                subnet_id: id.row_id(),
            });
        }

        let result = sqlx::query(
            "INSERT INTO lease (mac_address, ip_address, subnet_id) VALUES (?, ?, ?)",
        )
        .bind(mac.to_string())
        .bind(next.to_string())
        .bind(id.row_id())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let lease_id = result.last_insert_rowid();

        tx.commit().await.map_err(map_sqlx)?;

        Ok(Lease {
            id: lease_id,
            mac_address: mac,
            ip_address: next,
            subnet_id: id.row_id(),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn management_subnet(&self) -> Result<Subnet> {
        self.subnet(SubnetId::Management).await
    }

    async fn service_subnet(&self) -> Result<Subnet> {
        self.subnet(SubnetId::Service).await
    }

    async fn create_management_subnet(
        &self,
        network: Cidr,
        start: Ipv4,
        end: Ipv4,
    ) -> Result<Subnet> {
        self.create_subnet(Subnet {
            id: SubnetId::Management.row_id(),
            network,
            start,
            end,
            gateway: None,
            dns_server: None,
        })
        .await
    }

    async fn create_service_subnet(
        &self,
        network: Cidr,
        start: Ipv4,
        end: Ipv4,
        gateway: Ipv4,
        dns_server: Ipv4,
    ) -> Result<Subnet> {
        self.create_subnet(Subnet {
            id: SubnetId::Service.row_id(),
            network,
            start,
            end,
            gateway: Some(gateway),
            dns_server: Some(dns_server),
        })
        .await
    }

    async fn management_lease(&self, mac: MacAddr) -> Result<Lease> {
        self.lease(mac, SubnetId::Management).await
    }

    async fn service_lease(&self, mac: MacAddr) -> Result<Lease> {
        self.lease(mac, SubnetId::Service).await
    }

    async fn create_management_lease(&self, mac: MacAddr) -> Result<Lease> {
        self.create_lease(mac, SubnetId::Management).await
    }

    async fn create_service_lease(&self, mac: MacAddr) -> Result<Lease> {
        self.create_lease(mac, SubnetId::Service).await
    }

    async fn lease_address(&self, id: i64) -> Result<LeaseAddress> {
        let row = sqlx::query(
            "SELECT l.id, l.ip_address, s.network, s.gateway, s.dns_server \
             FROM lease l INNER JOIN subnet s ON l.subnet_id = s.id \
             WHERE l.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StoreError::NotFound(format!("lease {id}")))?;

        Ok(LeaseAddress {
            id: row.get("id"),
            ip_address: parse_col(&row.get::<String, _>("ip_address"), "lease.ip_address")?,
            network: parse_col(&row.get::<String, _>("network"), "subnet.network")?,
            gateway: parse_opt_col(row.get::<Option<String>, _>("gateway"), "subnet.gateway")?,
            dns_server: parse_opt_col(
                row.get::<Option<String>, _>("dns_server"),
                "subnet.dns_server",
            )?,
        })
    }

    async fn register_host(
        &self,
        uuid: Uuid,
        serial: &str,
        product: &str,
        manufacturer: &str,
        service_lease_id: i64,
        management_lease_id: i64,
    ) -> Result<Host> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // Name is derived from the autoincrement id, so insert with a
        // transaction-local placeholder first.
        let result = sqlx::query(
            "INSERT INTO host \
             (uuid, name, serial, product, manufacturer, service_lease_id, management_lease_id) \
             VALUES (?, '', ?, ?, ?, ?, ?)",
        )
        .bind(uuid.to_string())
        .bind(serial)
        .bind(product)
        .bind(manufacturer)
        .bind(service_lease_id)
        .bind(management_lease_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let host_id = result.last_insert_rowid();

        let name = format!("{}{:04}", self.hostname_prefix, host_id);
        sqlx::query("UPDATE host SET name = ? WHERE id = ?")
            .bind(&name)
            .bind(host_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        Ok(Host {
            id: host_id,
            uuid,
            name,
            serial: serial.to_string(),
            product: product.to_string(),
            manufacturer: manufacturer.to_string(),
            service_lease_id,
            management_lease_id,
        })
    }

    async fn host_by_address(&self, ip: Ipv4) -> Result<Host> {
        let row = sqlx::query(
            "SELECT h.id, h.uuid, h.name, h.serial, h.product, h.manufacturer, \
                    h.service_lease_id, h.management_lease_id \
             FROM host h INNER JOIN lease l ON h.management_lease_id = l.id \
             WHERE l.ip_address = ?",
        )
        .bind(ip.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StoreError::NotFound(format!("host with address {ip}")))?;

        host_from_row(&row)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT id, name FROM user ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(rows
            .iter()
            .map(|row| User {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn list_keys_by_user(&self, user_id: i64) -> Result<Vec<SshKey>> {
        let rows = sqlx::query("SELECT id, key, user_id FROM key WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(rows
            .iter()
            .map(|row| SshKey {
                id: row.get("id"),
                key: row.get("key"),
                user_id: row.get("user_id"),
            })
            .collect())
    }

    async fn create_user(&self, name: &str) -> Result<User> {
        let result = sqlx::query("INSERT INTO user (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(User {
            id: result.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    async fn create_key(&self, user_id: i64, key: &str) -> Result<SshKey> {
        let result = sqlx::query("INSERT INTO key (key, user_id) VALUES (?, ?)")
            .bind(key)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(SshKey {
            id: result.last_insert_rowid(),
            key: key.to_string(),
            user_id,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_col<T: FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidData(format!("{what}: {value:?}")))
}

fn parse_opt_col<T: FromStr>(value: Option<String>, what: &str) -> Result<Option<T>> {
    value.map(|v| parse_col(&v, what)).transpose()
}

fn subnet_from_row(row: &SqliteRow) -> Result<Subnet> {
    Ok(Subnet {
        id: row.get("id"),
        network: parse_col(&row.get::<String, _>("network"), "subnet.network")?,
        start: parse_col(&row.get::<String, _>("start"), "subnet.start")?,
        end: parse_col(&row.get::<String, _>("end"), "subnet.end")?,
        gateway: parse_opt_col(row.get::<Option<String>, _>("gateway"), "subnet.gateway")?,
        dns_server: parse_opt_col(
            row.get::<Option<String>, _>("dns_server"),
            "subnet.dns_server",
        )?,
    })
}

fn lease_from_row(row: &SqliteRow) -> Result<Lease> {
    Ok(Lease {
        id: row.get("id"),
        mac_address: parse_col(&row.get::<String, _>("mac_address"), "lease.mac_address")?,
        ip_address: parse_col(&row.get::<String, _>("ip_address"), "lease.ip_address")?,
        subnet_id: row.get("subnet_id"),
    })
}

fn host_from_row(row: &SqliteRow) -> Result<Host> {
    Ok(Host {
        id: row.get("id"),
        uuid: parse_col(&row.get::<String, _>("uuid"), "host.uuid")?,
        name: row.get("name"),
        serial: row.get("serial"),
        product: row.get("product"),
        manufacturer: row.get("manufacturer"),
        service_lease_id: row.get("service_lease_id"),
        management_lease_id: row.get("management_lease_id"),
    })
}
