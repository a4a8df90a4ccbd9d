//! SQLite storage backend

use super::traits::{AddEdgeOutcome, CommitOutcome, GraphStore, OpenStore, StorageError, StorageResult};
use crate::graph::{
    default_local_name, Adjacency, Edge, EdgeDeclaration, EdgeId, Fingerprint, Node, NodeId,
    Output, OutputContract, Outputs,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const NODE_COLUMNS: &str = "id, alias, serial, created_at, updated_at";

const CONTRACT_COLUMNS: &str =
    "node_id, output_key, contract_json, source, validity_json, created_at";

const EDGE_COLUMNS: &str = "id, producer_id, output_key, consumer_id, local_name, status,
    producer_fingerprint, observed_fingerprint, mock_json, validity_json, timestamps_json";

/// SQLite-backed graph store
///
/// Uses a single SQLite database with tables for nodes, outputs, contracts
/// and edges. Thread-safe via an internal mutex on the connection; checks
/// that must be atomic with their write run in `BEGIN IMMEDIATE`
/// transactions while the mutex is held.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                alias TEXT NOT NULL UNIQUE,
                serial INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outputs (
                node_id TEXT NOT NULL,
                output_key TEXT NOT NULL,
                value_json TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                PRIMARY KEY (node_id, output_key),
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_outputs_key
                ON outputs(output_key);

            -- Contracts outlive their output when declared by a user,
            -- so they are keyed independently of the outputs table.
            CREATE TABLE IF NOT EXISTS contracts (
                node_id TEXT NOT NULL,
                output_key TEXT NOT NULL,
                contract_json TEXT NOT NULL,
                source TEXT NOT NULL,
                validity_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (node_id, output_key),
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                producer_id TEXT NOT NULL,
                output_key TEXT NOT NULL,
                consumer_id TEXT NOT NULL,
                local_name TEXT NOT NULL,
                status TEXT NOT NULL,
                producer_fingerprint TEXT,
                observed_fingerprint TEXT,
                mock_json TEXT,
                validity_json TEXT NOT NULL,
                timestamps_json TEXT NOT NULL,
                UNIQUE (producer_id, output_key, consumer_id),
                UNIQUE (consumer_id, local_name),
                FOREIGN KEY (producer_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (consumer_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_edges_producer
                ON edges(producer_id, output_key);
            CREATE INDEX IF NOT EXISTS idx_edges_consumer
                ON edges(consumer_id);

            PRAGMA foreign_keys = ON;

            -- Concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    // === Row helpers ===

    fn read_node(conn: &Connection, id: &NodeId) -> StorageResult<Option<Node>> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS);
        let row = conn
            .query_row(&sql, params![id.to_string()], NodeRow::read)
            .optional()?;
        match row {
            Some(row) => {
                let mut node = row.into_node()?;
                node.outputs = Self::read_outputs(conn, &node.id)?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    fn read_outputs(conn: &Connection, id: &NodeId) -> StorageResult<Outputs> {
        let mut stmt = conn.prepare(
            "SELECT output_key, value_json, fingerprint FROM outputs WHERE node_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut outputs = BTreeMap::new();
        for (key, value_json, fingerprint) in rows {
            outputs.insert(
                key,
                Output {
                    value: serde_json::from_str(&value_json)?,
                    fingerprint: Fingerprint::from_string(fingerprint),
                },
            );
        }
        Ok(outputs)
    }

    fn read_contract(conn: &Connection, node: &NodeId, key: &str) -> StorageResult<Option<OutputContract>> {
        let sql = format!(
            "SELECT {} FROM contracts WHERE node_id = ?1 AND output_key = ?2",
            CONTRACT_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![node.to_string(), key], ContractRow::read)
            .optional()?;
        row.map(ContractRow::into_contract).transpose()
    }

    fn query_edges(conn: &Connection, clause: &str, params: impl rusqlite::Params) -> StorageResult<Vec<Edge>> {
        let sql = format!(
            "SELECT {} FROM edges {} ORDER BY output_key, local_name",
            EDGE_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, EdgeRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EdgeRow::into_edge).collect()
    }

    fn write_edge(conn: &Connection, edge: &Edge) -> StorageResult<()> {
        let row = EdgeRow::from_edge(edge)?;
        conn.execute(
            r#"
            INSERT INTO edges (id, producer_id, output_key, consumer_id, local_name, status,
                               producer_fingerprint, observed_fingerprint, mock_json,
                               validity_json, timestamps_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                local_name = excluded.local_name,
                status = excluded.status,
                producer_fingerprint = excluded.producer_fingerprint,
                observed_fingerprint = excluded.observed_fingerprint,
                mock_json = excluded.mock_json,
                validity_json = excluded.validity_json,
                timestamps_json = excluded.timestamps_json
            "#,
            params![
                row.id,
                row.producer,
                row.output_key,
                row.consumer,
                row.local_name,
                row.status,
                row.producer_fingerprint,
                row.observed_fingerprint,
                row.mock_json,
                row.validity_json,
                row.timestamps_json,
            ],
        )?;
        Ok(())
    }

    fn write_contract(conn: &Connection, contract: &OutputContract) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT INTO contracts (node_id, output_key, contract_json, source, validity_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(node_id, output_key) DO UPDATE SET
                contract_json = excluded.contract_json,
                source = excluded.source,
                validity_json = excluded.validity_json,
                created_at = excluded.created_at
            "#,
            params![
                contract.node.to_string(),
                contract.output_key,
                serde_json::to_string(&contract.contract)?,
                contract.source.as_str(),
                serde_json::to_string(&contract.validity)?,
                contract.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn local_name_in_use(conn: &Connection, consumer: &NodeId, local_name: &str) -> StorageResult<bool> {
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM edges WHERE consumer_id = ?1 AND local_name = ?2",
            params![consumer.to_string(), local_name],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    fn load_adjacency(conn: &Connection) -> StorageResult<Adjacency> {
        let mut stmt = conn.prepare("SELECT DISTINCT producer_id, consumer_id FROM edges")?;
        let links = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut adjacency = Adjacency::new();
        for (producer, consumer) in links {
            adjacency.link(parse_node_id(&producer)?, parse_node_id(&consumer)?);
        }
        Ok(adjacency)
    }

    fn alias_owner(conn: &Connection, alias: &str) -> StorageResult<Option<String>> {
        Ok(conn
            .query_row("SELECT id FROM nodes WHERE alias = ?1", params![alias], |row| row.get(0))
            .optional()?)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    // === Node Operations ===

    fn insert_node(&self, node: &Node) -> StorageResult<()> {
        let serial = serial_to_sql(node.serial)?;
        let conn = self.conn()?;
        if Self::alias_owner(&conn, &node.alias)?.is_some() {
            return Err(StorageError::AliasTaken(node.alias.clone()));
        }
        conn.execute(
            "INSERT INTO nodes (id, alias, serial, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                node.id.to_string(),
                node.alias,
                serial,
                node.created_at.to_rfc3339(),
                node.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_node(&self, id: &NodeId) -> StorageResult<Option<Node>> {
        let conn = self.conn()?;
        Self::read_node(&conn, id)
    }

    fn find_node_by_alias(&self, alias: &str) -> StorageResult<Option<Node>> {
        let conn = self.conn()?;
        match Self::alias_owner(&conn, alias)? {
            Some(id) => Self::read_node(&conn, &parse_node_id(&id)?),
            None => Ok(None),
        }
    }

    fn rename_node(&self, id: &NodeId, alias: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        if let Some(owner) = Self::alias_owner(&conn, alias)? {
            if owner != id.to_string() {
                return Err(StorageError::AliasTaken(alias.to_string()));
            }
        }
        let rows = conn.execute(
            "UPDATE nodes SET alias = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), alias, Utc::now().to_rfc3339()],
        )?;
        if rows == 0 {
            return Err(StorageError::NodeNotFound(*id));
        }
        Ok(())
    }

    fn list_nodes(&self) -> StorageResult<Vec<Node>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM nodes ORDER BY alias", NODE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], NodeRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    fn commit_write(&self, id: &NodeId, serial: u64, outputs: &Outputs) -> StorageResult<CommitOutcome> {
        let sql_serial = serial_to_sql(serial)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let node_key = id.to_string();

        let stored: Option<i64> = tx
            .query_row("SELECT serial FROM nodes WHERE id = ?1", params![node_key], |row| row.get(0))
            .optional()?;
        let Some(stored) = stored else {
            return Err(StorageError::NodeNotFound(*id));
        };
        let stored = serial_from_sql(stored)?;
        if serial <= stored {
            // Dropping the transaction rolls it back
            return Ok(CommitOutcome::Stale { stored });
        }

        let previous: BTreeMap<String, Fingerprint> = Self::read_outputs(&tx, id)?
            .into_iter()
            .map(|(key, output)| (key, output.fingerprint))
            .collect();

        tx.execute("DELETE FROM outputs WHERE node_id = ?1", params![node_key])?;
        for (key, output) in outputs {
            tx.execute(
                "INSERT INTO outputs (node_id, output_key, value_json, fingerprint) VALUES (?1, ?2, ?3, ?4)",
                params![
                    node_key,
                    key,
                    serde_json::to_string(&output.value)?,
                    output.fingerprint.as_str(),
                ],
            )?;
        }
        tx.execute(
            "UPDATE nodes SET serial = ?2, updated_at = ?3 WHERE id = ?1",
            params![node_key, sql_serial, Utc::now().to_rfc3339()],
        )?;

        let node = Self::read_node(&tx, id)?.ok_or(StorageError::NodeNotFound(*id))?;
        tx.commit()?;

        Ok(CommitOutcome::Applied { previous, node })
    }

    fn search_outputs(&self, key: &str) -> StorageResult<Vec<(NodeId, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT node_id, output_key FROM outputs WHERE output_key = ?1 ORDER BY node_id",
        )?;
        let rows = stmt
            .query_map(params![key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(node, key)| Ok((parse_node_id(&node)?, key)))
            .collect()
    }

    // === Contract Operations ===

    fn load_contract(&self, node: &NodeId, output_key: &str) -> StorageResult<Option<OutputContract>> {
        let conn = self.conn()?;
        Self::read_contract(&conn, node, output_key)
    }

    fn load_contracts(&self, node: &NodeId) -> StorageResult<Vec<OutputContract>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM contracts WHERE node_id = ?1 ORDER BY output_key",
            CONTRACT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![node.to_string()], ContractRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ContractRow::into_contract).collect()
    }

    fn save_contract(&self, contract: &OutputContract) -> StorageResult<()> {
        let conn = self.conn()?;
        Self::write_contract(&conn, contract)
    }

    fn delete_contract(&self, node: &NodeId, output_key: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM contracts WHERE node_id = ?1 AND output_key = ?2",
            params![node.to_string(), output_key],
        )?;
        Ok(rows > 0)
    }

    fn save_inferred_contract(&self, contract: &OutputContract, started_serial: u64) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let node_key = contract.node.to_string();

        let serial: Option<i64> = tx
            .query_row("SELECT serial FROM nodes WHERE id = ?1", params![node_key], |row| row.get(0))
            .optional()?;
        if serial.map(serial_from_sql).transpose()? != Some(started_serial) {
            return Ok(false);
        }

        let output_exists: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM outputs WHERE node_id = ?1 AND output_key = ?2",
            params![node_key, contract.output_key],
            |row| row.get(0),
        )?;
        if !output_exists {
            return Ok(false);
        }

        if Self::read_contract(&tx, &contract.node, &contract.output_key)?.is_some() {
            return Ok(false);
        }

        Self::write_contract(&tx, contract)?;
        tx.commit()?;
        Ok(true)
    }

    // === Edge Operations ===

    fn add_edge(&self, declaration: &EdgeDeclaration) -> StorageResult<AddEdgeOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::query_edges(
            &tx,
            "WHERE producer_id = ?1 AND output_key = ?2 AND consumer_id = ?3",
            params![
                declaration.producer.to_string(),
                declaration.output_key,
                declaration.consumer.to_string(),
            ],
        )?;
        if let Some(edge) = existing.into_iter().next() {
            return Ok(AddEdgeOutcome::Existing(edge));
        }

        let producer = Self::read_node(&tx, &declaration.producer)?
            .ok_or(StorageError::NodeNotFound(declaration.producer))?;
        if Self::read_node(&tx, &declaration.consumer)?.is_none() {
            return Err(StorageError::NodeNotFound(declaration.consumer));
        }

        let local_name = match &declaration.local_name {
            Some(explicit) => {
                if Self::local_name_in_use(&tx, &declaration.consumer, explicit)? {
                    return Ok(AddEdgeOutcome::LocalNameTaken(explicit.clone()));
                }
                explicit.clone()
            }
            None => {
                // Defaults of different producers can sanitize to the same
                // name; suffix `_2`, `_3`, ... until one is free
                let base = default_local_name(&producer.alias, &declaration.output_key);
                let mut candidate = base.clone();
                let mut n = 2;
                while Self::local_name_in_use(&tx, &declaration.consumer, &candidate)? {
                    candidate = format!("{}_{}", base, n);
                    n += 1;
                }
                candidate
            }
        };

        let adjacency = Self::load_adjacency(&tx)?;
        if let Some(cycle) = adjacency.cycle_if_linked(declaration.producer, declaration.consumer) {
            return Ok(AddEdgeOutcome::Cycle(cycle));
        }

        let validity = Self::read_contract(&tx, &declaration.producer, &declaration.output_key)?
            .map(|c| c.validity)
            .unwrap_or_default();
        let fingerprint = producer
            .output(&declaration.output_key)
            .map(|o| o.fingerprint.clone());

        let mut edge = Edge::new(
            declaration.producer,
            declaration.output_key.clone(),
            declaration.consumer,
            local_name,
        );
        if let Some(mock) = &declaration.mock_value {
            edge = edge.with_mock(mock.clone());
        }
        edge.set_producer_state(fingerprint, validity);

        Self::write_edge(&tx, &edge)?;
        tx.commit()?;
        Ok(AddEdgeOutcome::Created(edge))
    }

    fn load_edge(&self, id: &EdgeId) -> StorageResult<Option<Edge>> {
        let conn = self.conn()?;
        let edges = Self::query_edges(&conn, "WHERE id = ?1", params![id.to_string()])?;
        Ok(edges.into_iter().next())
    }

    fn remove_edge(&self, id: &EdgeId) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM edges WHERE id = ?1", params![id.to_string()])?;
        Ok(rows > 0)
    }

    fn update_edge(&self, id: &EdgeId, update: &mut dyn FnMut(&mut Edge)) -> StorageResult<Option<Edge>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let edges = Self::query_edges(&tx, "WHERE id = ?1", params![id.to_string()])?;
        let Some(mut edge) = edges.into_iter().next() else {
            return Ok(None);
        };
        update(&mut edge);
        Self::write_edge(&tx, &edge)?;
        tx.commit()?;
        Ok(Some(edge))
    }

    fn edges_from(&self, node: &NodeId) -> StorageResult<Vec<Edge>> {
        let conn = self.conn()?;
        Self::query_edges(&conn, "WHERE producer_id = ?1", params![node.to_string()])
    }

    fn edges_to(&self, node: &NodeId) -> StorageResult<Vec<Edge>> {
        let conn = self.conn()?;
        Self::query_edges(&conn, "WHERE consumer_id = ?1", params![node.to_string()])
    }

    fn edges_for_output(&self, producer: &NodeId, output_key: &str) -> StorageResult<Vec<Edge>> {
        let conn = self.conn()?;
        Self::query_edges(
            &conn,
            "WHERE producer_id = ?1 AND output_key = ?2",
            params![producer.to_string(), output_key],
        )
    }

    fn all_edges(&self) -> StorageResult<Vec<Edge>> {
        let conn = self.conn()?;
        Self::query_edges(&conn, "", [])
    }
}

// === Row types ===

struct NodeRow {
    id: String,
    alias: String,
    serial: i64,
    created_at: String,
    updated_at: String,
}

impl NodeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            alias: row.get(1)?,
            serial: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_node(self) -> StorageResult<Node> {
        Ok(Node {
            id: parse_node_id(&self.id)?,
            alias: self.alias,
            serial: serial_from_sql(self.serial)?,
            outputs: BTreeMap::new(),
            created_at: parse_date(&self.created_at)?,
            updated_at: parse_date(&self.updated_at)?,
        })
    }
}

struct ContractRow {
    node: String,
    output_key: String,
    contract_json: String,
    source: String,
    validity_json: String,
    created_at: String,
}

impl ContractRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            node: row.get(0)?,
            output_key: row.get(1)?,
            contract_json: row.get(2)?,
            source: row.get(3)?,
            validity_json: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_contract(self) -> StorageResult<OutputContract> {
        Ok(OutputContract {
            node: parse_node_id(&self.node)?,
            output_key: self.output_key,
            contract: serde_json::from_str(&self.contract_json)?,
            source: self.source.parse().map_err(StorageError::Corrupt)?,
            validity: serde_json::from_str(&self.validity_json)?,
            created_at: parse_date(&self.created_at)?,
        })
    }
}

struct EdgeRow {
    id: String,
    producer: String,
    output_key: String,
    consumer: String,
    local_name: String,
    status: String,
    producer_fingerprint: Option<String>,
    observed_fingerprint: Option<String>,
    mock_json: Option<String>,
    validity_json: String,
    timestamps_json: String,
}

impl EdgeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            producer: row.get(1)?,
            output_key: row.get(2)?,
            consumer: row.get(3)?,
            local_name: row.get(4)?,
            status: row.get(5)?,
            producer_fingerprint: row.get(6)?,
            observed_fingerprint: row.get(7)?,
            mock_json: row.get(8)?,
            validity_json: row.get(9)?,
            timestamps_json: row.get(10)?,
        })
    }

    fn from_edge(edge: &Edge) -> StorageResult<Self> {
        Ok(Self {
            id: edge.id.to_string(),
            producer: edge.producer.to_string(),
            output_key: edge.output_key.clone(),
            consumer: edge.consumer.to_string(),
            local_name: edge.local_name.clone(),
            status: edge.status.as_str().to_string(),
            producer_fingerprint: edge.producer_fingerprint.as_ref().map(|f| f.as_str().to_string()),
            observed_fingerprint: edge.observed_fingerprint.as_ref().map(|f| f.as_str().to_string()),
            mock_json: edge.mock_value.as_ref().map(serde_json::to_string).transpose()?,
            validity_json: serde_json::to_string(&edge.validity)?,
            timestamps_json: serde_json::to_string(&edge.timestamps)?,
        })
    }

    fn into_edge(self) -> StorageResult<Edge> {
        Ok(Edge {
            id: self
                .id
                .parse::<EdgeId>()
                .map_err(|e| StorageError::Corrupt(format!("edge id {}: {}", self.id, e)))?,
            producer: parse_node_id(&self.producer)?,
            output_key: self.output_key,
            consumer: parse_node_id(&self.consumer)?,
            local_name: self.local_name,
            status: self.status.parse().map_err(StorageError::Corrupt)?,
            producer_fingerprint: self.producer_fingerprint.map(Fingerprint::from_string),
            observed_fingerprint: self.observed_fingerprint.map(Fingerprint::from_string),
            mock_value: self.mock_json.as_deref().map(serde_json::from_str).transpose()?,
            validity: serde_json::from_str(&self.validity_json)?,
            timestamps: serde_json::from_str(&self.timestamps_json)?,
        })
    }
}

fn parse_node_id(s: &str) -> StorageResult<NodeId> {
    s.parse()
        .map_err(|e| StorageError::Corrupt(format!("node id {}: {}", s, e)))
}

fn parse_date(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(e.to_string()))
}

/// SQLite integers are signed; serials above `i64::MAX` are refused.
fn serial_to_sql(serial: u64) -> StorageResult<i64> {
    i64::try_from(serial).map_err(|_| StorageError::SerialOutOfRange(serial))
}

fn serial_from_sql(serial: i64) -> StorageResult<u64> {
    u64::try_from(serial).map_err(|_| StorageError::Corrupt(format!("negative serial {}", serial)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContractSource, OutputContract, Status, Validity, ValidityStatus};
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn node(store: &SqliteStore, alias: &str) -> NodeId {
        let node = Node::new(alias);
        store.insert_node(&node).unwrap();
        node.id
    }

    fn outputs(pairs: &[(&str, serde_json::Value)]) -> Outputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Output::new(v.clone())))
            .collect()
    }

    fn created(outcome: AddEdgeOutcome) -> Edge {
        match outcome {
            AddEdgeOutcome::Created(edge) => edge,
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[test]
    fn insert_and_load_node() {
        let store = store();
        let id = node(&store, "network");

        let loaded = store.load_node(&id).unwrap().unwrap();
        assert_eq!(loaded.alias, "network");
        assert_eq!(loaded.serial, 0);
        assert!(loaded.outputs.is_empty());

        let by_alias = store.find_node_by_alias("network").unwrap().unwrap();
        assert_eq!(by_alias.id, id);
    }

    #[test]
    fn duplicate_alias_rejected() {
        let store = store();
        node(&store, "network");
        let err = store.insert_node(&Node::new("network")).unwrap_err();
        assert!(matches!(err, StorageError::AliasTaken(a) if a == "network"));
    }

    #[test]
    fn rename_checks_alias_ownership() {
        let store = store();
        let a = node(&store, "a");
        node(&store, "b");

        assert!(matches!(store.rename_node(&a, "b"), Err(StorageError::AliasTaken(_))));
        store.rename_node(&a, "a").unwrap();
        store.rename_node(&a, "alpha").unwrap();
        assert!(store.find_node_by_alias("alpha").unwrap().is_some());
        assert!(matches!(
            store.rename_node(&NodeId::new(), "zeta"),
            Err(StorageError::NodeNotFound(_))
        ));
    }

    #[test]
    fn commit_write_replaces_outputs_and_reports_previous() {
        let store = store();
        let id = node(&store, "network");

        let first = store
            .commit_write(&id, 1, &outputs(&[("vpc_id", json!("vpc-111")), ("cidr", json!("10.0.0.0/16"))]))
            .unwrap();
        match first {
            CommitOutcome::Applied { previous, node } => {
                assert!(previous.is_empty());
                assert_eq!(node.serial, 1);
                assert_eq!(node.outputs.len(), 2);
            }
            other => panic!("expected Applied, got {:?}", other),
        }

        let second = store
            .commit_write(&id, 2, &outputs(&[("vpc_id", json!("vpc-222"))]))
            .unwrap();
        match second {
            CommitOutcome::Applied { previous, node } => {
                assert_eq!(previous.len(), 2);
                assert_eq!(previous["vpc_id"], Fingerprint::of(&json!("vpc-111")));
                assert!(!node.has_output("cidr"));
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[test]
    fn stale_serial_is_a_noop() {
        let store = store();
        let id = node(&store, "network");
        store.commit_write(&id, 5, &outputs(&[("vpc_id", json!("vpc-5"))])).unwrap();

        for serial in [5, 4] {
            let outcome = store.commit_write(&id, serial, &outputs(&[])).unwrap();
            assert!(matches!(outcome, CommitOutcome::Stale { stored: 5 }));
        }
        let loaded = store.load_node(&id).unwrap().unwrap();
        assert_eq!(loaded.serial, 5);
        assert!(loaded.has_output("vpc_id"));
    }

    #[test]
    fn add_edge_seeds_producer_state() {
        let store = store();
        let a = node(&store, "a");
        let b = node(&store, "b");
        store.commit_write(&a, 1, &outputs(&[("vpc_id", json!("vpc-111"))])).unwrap();

        let edge = created(store.add_edge(&EdgeDeclaration::new(a, "vpc_id", b)).unwrap());
        assert_eq!(edge.status, Status::Pending);
        assert_eq!(edge.local_name, "a_vpc_id");
        assert_eq!(edge.producer_fingerprint, Some(Fingerprint::of(&json!("vpc-111"))));

        let missing = created(store.add_edge(&EdgeDeclaration::new(a, "subnet", b)).unwrap());
        assert_eq!(missing.status, Status::MissingOutput);
    }

    #[test]
    fn add_edge_is_idempotent() {
        let store = store();
        let a = node(&store, "a");
        let b = node(&store, "b");

        let first = created(store.add_edge(&EdgeDeclaration::new(a, "x", b)).unwrap());
        match store.add_edge(&EdgeDeclaration::new(a, "x", b).with_local_name("other")).unwrap() {
            AddEdgeOutcome::Existing(edge) => assert_eq!(edge, first),
            other => panic!("expected Existing, got {:?}", other),
        }
        assert_eq!(store.all_edges().unwrap().len(), 1);
    }

    #[test]
    fn add_edge_rejects_cycle_inside_transaction() {
        let store = store();
        let a = node(&store, "a");
        let b = node(&store, "b");
        let c = node(&store, "c");
        created(store.add_edge(&EdgeDeclaration::new(a, "x", b)).unwrap());
        created(store.add_edge(&EdgeDeclaration::new(b, "y", c)).unwrap());

        match store.add_edge(&EdgeDeclaration::new(c, "z", a)).unwrap() {
            AddEdgeOutcome::Cycle(path) => assert_eq!(path, vec![c, a, b, c]),
            other => panic!("expected Cycle, got {:?}", other),
        }
        assert_eq!(store.all_edges().unwrap().len(), 2);
    }

    #[test]
    fn local_name_conflict() {
        let store = store();
        let a = node(&store, "a");
        let b = node(&store, "b");
        let c = node(&store, "c");
        created(store.add_edge(&EdgeDeclaration::new(a, "x", c).with_local_name("input")).unwrap());

        let outcome = store
            .add_edge(&EdgeDeclaration::new(b, "x", c).with_local_name("input"))
            .unwrap();
        assert!(matches!(outcome, AddEdgeOutcome::LocalNameTaken(n) if n == "input"));
    }

    #[test]
    fn colliding_default_names_get_a_suffix() {
        let store = store();
        let net = node(&store, "net");
        let net_vpc = node(&store, "net_vpc");
        let net_dash = node(&store, "net-vpc");
        let app = node(&store, "app");

        let first = created(store.add_edge(&EdgeDeclaration::new(net, "vpc_id", app)).unwrap());
        let second = created(store.add_edge(&EdgeDeclaration::new(net_vpc, "id", app)).unwrap());
        let third = created(store.add_edge(&EdgeDeclaration::new(net_dash, "id", app)).unwrap());
        assert_eq!(first.local_name, "net_vpc_id");
        assert_eq!(second.local_name, "net_vpc_id_2");
        assert_eq!(third.local_name, "net_vpc_id_3");

        // Explicit names are still refused outright
        let outcome = store
            .add_edge(&EdgeDeclaration::new(net, "cidr", app).with_local_name("net_vpc_id_2"))
            .unwrap();
        assert!(matches!(outcome, AddEdgeOutcome::LocalNameTaken(n) if n == "net_vpc_id_2"));
    }

    #[test]
    fn serial_beyond_sqlite_range_is_refused() {
        let store = store();
        let id = node(&store, "network");
        store.commit_write(&id, i64::MAX as u64, &outputs(&[("x", json!(1))])).unwrap();

        let err = store
            .commit_write(&id, i64::MAX as u64 + 1, &outputs(&[("x", json!(2))]))
            .unwrap_err();
        assert!(matches!(err, StorageError::SerialOutOfRange(s) if s == i64::MAX as u64 + 1));
        let loaded = store.load_node(&id).unwrap().unwrap();
        assert_eq!(loaded.serial, i64::MAX as u64);
        assert_eq!(loaded.output("x").unwrap().value, json!(1));
    }

    #[test]
    fn mock_edge_round_trips() {
        let store = store();
        let a = node(&store, "a");
        let b = node(&store, "b");
        let edge = created(
            store
                .add_edge(&EdgeDeclaration::new(a, "vpc_id", b).with_mock(json!("vpc-mock")))
                .unwrap(),
        );
        assert_eq!(edge.status, Status::Mock);

        let loaded = store.load_edge(&edge.id).unwrap().unwrap();
        assert_eq!(loaded.mock_value, Some(json!("vpc-mock")));
        assert_eq!(loaded, edge);
    }

    #[test]
    fn update_edge_read_modify_write() {
        let store = store();
        let a = node(&store, "a");
        let b = node(&store, "b");
        store.commit_write(&a, 1, &outputs(&[("x", json!(1))])).unwrap();
        let edge = created(store.add_edge(&EdgeDeclaration::new(a, "x", b)).unwrap());

        let updated = store
            .update_edge(&edge.id, &mut |e: &mut Edge| e.observe(Fingerprint::of(&json!(1))))
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, Status::Clean);
        assert_eq!(store.load_edge(&edge.id).unwrap().unwrap().status, Status::Clean);

        assert!(store.remove_edge(&edge.id).unwrap());
        assert!(store.update_edge(&edge.id, &mut |_: &mut Edge| {}).unwrap().is_none());
    }

    #[test]
    fn inferred_contract_guard() {
        let store = store();
        let a = node(&store, "a");
        store.commit_write(&a, 10, &outputs(&[("x", json!("v"))])).unwrap();
        let contract = OutputContract::inferred(a, "x", json!({"type": "string"}));

        // Node moved on: discarded
        store.commit_write(&a, 11, &outputs(&[])).unwrap();
        assert!(!store.save_inferred_contract(&contract, 10).unwrap());
        assert!(store.load_contract(&a, "x").unwrap().is_none());

        // Same serial and output present: persisted once
        store.commit_write(&a, 12, &outputs(&[("x", json!("v"))])).unwrap();
        assert!(store.save_inferred_contract(&contract, 12).unwrap());
        assert!(!store.save_inferred_contract(&contract, 12).unwrap());
        let saved = store.load_contract(&a, "x").unwrap().unwrap();
        assert_eq!(saved.source, ContractSource::Inferred);
    }

    #[test]
    fn contract_crud() {
        let store = store();
        let a = node(&store, "a");
        let contract = OutputContract::declared(a, "x", json!({"type": "string"}))
            .with_validity(Validity::checked(ValidityStatus::Invalid, Some("bad".into()), 3));
        store.save_contract(&contract).unwrap();

        let loaded = store.load_contract(&a, "x").unwrap().unwrap();
        assert_eq!(loaded.validity.status, ValidityStatus::Invalid);
        assert_eq!(store.load_contracts(&a).unwrap().len(), 1);
        assert!(store.delete_contract(&a, "x").unwrap());
        assert!(!store.delete_contract(&a, "x").unwrap());
    }

    #[test]
    fn search_outputs_by_key() {
        let store = store();
        let a = node(&store, "a");
        let b = node(&store, "b");
        store.commit_write(&a, 1, &outputs(&[("vpc_id", json!("1"))])).unwrap();
        store.commit_write(&b, 1, &outputs(&[("vpc_id", json!("2")), ("other", json!(3))])).unwrap();

        let found = store.search_outputs("vpc_id").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|(_, k)| k == "vpc_id"));
        assert!(store.search_outputs("nothing").unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");

        let (a, b) = {
            let store = SqliteStore::open(&path).unwrap();
            let a = node(&store, "a");
            let b = node(&store, "b");
            store.commit_write(&a, 1, &outputs(&[("x", json!(1))])).unwrap();
            created(store.add_edge(&EdgeDeclaration::new(a, "x", b)).unwrap());
            (a, b)
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_node(&a).unwrap().unwrap().serial, 1);
        assert_eq!(store.edges_to(&b).unwrap().len(), 1);
        assert_eq!(store.edges_from(&a).unwrap().len(), 1);
    }
}
