//! ScyllaDB schema creation

use crate::error::PersistenceError;
use scylla::Session;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // Chat messages, clustered newest-first per session for window reads
    let chat_messages = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.chat_messages (
            session_id TEXT,
            created_at TIMESTAMP,
            id UUID,
            user_id TEXT,
            role TEXT,
            content TEXT,
            is_blocked BOOLEAN,
            block_reason TEXT,
            PRIMARY KEY ((session_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, id DESC)
    "#,
        ks = keyspace
    );

    // Same rows partitioned by user for paginated history
    let messages_by_user = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.messages_by_user (
            user_id TEXT,
            created_at TIMESTAMP,
            id UUID,
            session_id TEXT,
            role TEXT,
            content TEXT,
            is_blocked BOOLEAN,
            block_reason TEXT,
            PRIMARY KEY ((user_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, id DESC)
    "#,
        ks = keyspace
    );

    let sessions = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.sessions (
            id TEXT,
            user_id TEXT,
            started_at TIMESTAMP,
            PRIMARY KEY (id)
        )
    "#,
        ks = keyspace
    );

    // One fact per (user_id, fact_type): the clustering key makes the
    // at-most-one invariant native upsert semantics
    let facts = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.facts (
            user_id TEXT,
            fact_type TEXT,
            id UUID,
            value TEXT,
            embedding LIST<FLOAT>,
            confidence FLOAT,
            created_at TIMESTAMP,
            PRIMARY KEY ((user_id), fact_type)
        )
    "#,
        ks = keyspace
    );

    let insights = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.insights (
            user_id TEXT,
            id UUID,
            category TEXT,
            content TEXT,
            sub_topic TEXT,
            embedding LIST<FLOAT>,
            confidence FLOAT,
            created_at TIMESTAMP,
            last_accessed TIMESTAMP,
            evolution_notes TEXT,
            PRIMARY KEY ((user_id), id)
        )
    "#,
        ks = keyspace
    );

    let summaries = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.summaries (
            user_id TEXT,
            session_id TEXT,
            created_at TIMESTAMP,
            id UUID,
            content TEXT,
            embedding LIST<FLOAT>,
            covers_until TIMESTAMP,
            PRIMARY KEY ((user_id, session_id), created_at)
        ) WITH CLUSTERING ORDER BY (created_at DESC)
    "#,
        ks = keyspace
    );

    // Knowledge graph read path (written by ingestion)
    let entities = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.entities (
            id TEXT,
            entity_type TEXT,
            name TEXT,
            aliases LIST<TEXT>,
            PRIMARY KEY (id)
        )
    "#,
        ks = keyspace
    );

    let entity_names = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.entity_names (
            name_lower TEXT,
            entity_id TEXT,
            PRIMARY KEY ((name_lower), entity_id)
        )
    "#,
        ks = keyspace
    );

    let entity_edges = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.entity_edges (
            src_id TEXT,
            edge_type TEXT,
            dst_id TEXT,
            PRIMARY KEY ((src_id), edge_type, dst_id)
        )
    "#,
        ks = keyspace
    );

    let chunk_entities = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ks}.chunk_entities (
            chunk_id TEXT,
            entity_id TEXT,
            PRIMARY KEY ((chunk_id), entity_id)
        )
    "#,
        ks = keyspace
    );

    for (name, ddl) in [
        ("chat_messages", &chat_messages),
        ("messages_by_user", &messages_by_user),
        ("sessions", &sessions),
        ("facts", &facts),
        ("insights", &insights),
        ("summaries", &summaries),
        ("entities", &entities),
        ("entity_names", &entity_names),
        ("entity_edges", &entity_edges),
        ("chunk_entities", &chunk_entities),
    ] {
        session
            .query_unpaged(ddl.clone(), &[])
            .await
            .map_err(|e| PersistenceError::Schema(format!("failed to create {name}: {e}")))?;
    }

    tracing::info!("All tables created successfully");
    Ok(())
}
