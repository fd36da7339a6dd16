use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use boltadm_core::connection_manager::{AccessMode, DriverBackend, DriverError, QueryRequest};
use boltadm_core::endpoint::{AuthToken, Endpoint};
use boltadm_core::record::{NodeValue, Record, RelationshipValue, Value};
use futures_util::TryStreamExt;
use neo4rs::{
    BoltMap, BoltNode, BoltRelation, BoltType, BoltUnboundedRelation, Config, ConfigBuilder,
    Graph,
};
use tracing::debug;

type Row = HashMap<String, BoltType>;

/// Bolt driver backed by `neo4rs`.
///
/// `neo4rs` always performs a basic-auth handshake, so an anonymous token is
/// sent as an empty principal and password. It also has no notion of access
/// mode; every query is routed the same way.
#[derive(Debug, Clone, Default)]
pub struct Neo4jDriverBackend;

#[async_trait]
impl DriverBackend for Neo4jDriverBackend {
    type Driver = Graph;

    async fn create_driver(
        &self,
        endpoint: &Endpoint,
        auth: &AuthToken,
    ) -> Result<Self::Driver, DriverError> {
        let config = config_from_endpoint(endpoint, auth)?;
        // The pool is lazy; no socket is opened until the first query.
        Graph::connect(config).await.map_err(to_driver_error)
    }

    async fn run(
        &self,
        driver: &Self::Driver,
        request: &QueryRequest,
    ) -> Result<Vec<Record>, DriverError> {
        if request.access_mode == AccessMode::Read {
            debug!(query = %request.query, "read access mode is not enforced by this driver");
        }

        let query = neo4rs::query(&request.query);
        let stream = match request.database.as_deref() {
            Some(database) => driver.execute_on(database, query).await,
            None => driver.execute(query).await,
        }
        .map_err(to_driver_error)?;

        let rows: Vec<Row> = stream
            .into_stream_as::<Row>()
            .try_collect()
            .await
            .map_err(to_driver_error)?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn close(&self, driver: Self::Driver) {
        // Dropping the last handle tears down the pool.
        drop(driver);
    }
}

fn config_from_endpoint(endpoint: &Endpoint, auth: &AuthToken) -> Result<Config, DriverError> {
    let (user, password) = match auth {
        AuthToken::None => ("", ""),
        AuthToken::Basic {
            principal,
            credentials,
        } => (principal.as_str(), credentials.as_str()),
    };

    let options = endpoint.options();
    let mut builder = ConfigBuilder::default()
        .uri(endpoint.uri())
        .user(user)
        .password(password)
        .fetch_size(options.fetch_size)
        .max_connections(options.max_connections);

    if let Some(certificate) = &options.client_certificate {
        builder = builder.with_client_certificate(certificate);
    }

    builder.build().map_err(to_driver_error)
}

fn row_to_record(row: Row) -> Record {
    row.into_iter()
        .map(|(column, value)| (column, bolt_to_value(value)))
        .collect()
}

fn bolt_to_value(value: BoltType) -> Value {
    match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(value) => Value::Boolean(value.value),
        BoltType::Integer(value) => Value::Integer(value.value),
        BoltType::Float(value) => Value::Float(value.value),
        BoltType::String(value) => Value::String(value.value),
        BoltType::List(list) => Value::List(list.value.into_iter().map(bolt_to_value).collect()),
        BoltType::Map(map) => Value::Map(map_to_properties(map)),
        BoltType::Node(node) => Value::Node(node_to_value(node)),
        BoltType::Relation(relation) => Value::Relationship(relation_to_value(relation)),
        BoltType::UnboundedRelation(relation) => {
            Value::Relationship(unbounded_relation_to_value(relation))
        }
        other => Value::Unsupported(unsupported_type_name(&other).to_string()),
    }
}

fn unsupported_type_name(value: &BoltType) -> &'static str {
    match value {
        BoltType::Point2D(_) => "Point2D",
        BoltType::Point3D(_) => "Point3D",
        BoltType::Bytes(_) => "Bytes",
        BoltType::Path(_) => "Path",
        BoltType::Duration(_) => "Duration",
        BoltType::Date(_) => "Date",
        BoltType::Time(_) => "Time",
        BoltType::LocalTime(_) => "LocalTime",
        BoltType::DateTime(_) => "DateTime",
        BoltType::LocalDateTime(_) => "LocalDateTime",
        BoltType::DateTimeZoneId(_) => "DateTimeZoneId",
        _ => "Unknown",
    }
}

fn map_to_properties(map: BoltMap) -> BTreeMap<String, Value> {
    map.value
        .into_iter()
        .map(|(key, value)| (key.value, bolt_to_value(value)))
        .collect()
}

// Bolt 4 structures carry no element id, so the capability stays off.
fn node_to_value(node: BoltNode) -> NodeValue {
    NodeValue {
        id: node.id.value,
        element_id: None,
        labels: node
            .labels
            .value
            .into_iter()
            .filter_map(|label| match label {
                BoltType::String(label) => Some(label.value),
                _ => None,
            })
            .collect(),
        properties: map_to_properties(node.properties),
    }
}

fn relation_to_value(relation: BoltRelation) -> RelationshipValue {
    RelationshipValue {
        id: relation.id.value,
        element_id: None,
        rel_type: relation.typ.value,
        start_node_id: Some(relation.start_node_id.value),
        end_node_id: Some(relation.end_node_id.value),
        properties: map_to_properties(relation.properties),
    }
}

fn unbounded_relation_to_value(relation: BoltUnboundedRelation) -> RelationshipValue {
    RelationshipValue {
        id: relation.id.value,
        element_id: None,
        rel_type: relation.typ.value,
        start_node_id: None,
        end_node_id: None,
        properties: map_to_properties(relation.properties),
    }
}

fn to_driver_error(error: neo4rs::Error) -> DriverError {
    if let neo4rs::Error::Neo4j(server) = &error {
        return DriverError::new(server.code(), server.message());
    }
    DriverError::new(error_name(&error), error.to_string())
}

fn error_name(error: &neo4rs::Error) -> &'static str {
    match error {
        neo4rs::Error::IOError { .. } => "IOError",
        neo4rs::Error::UrlParseError(_) => "UrlParseError",
        neo4rs::Error::UnsupportedScheme(_) => "UnsupportedScheme",
        neo4rs::Error::InvalidDnsName(_) => "InvalidDnsName",
        neo4rs::Error::ConnectionError => "ConnectionError",
        neo4rs::Error::InvalidConfig => "InvalidConfig",
        neo4rs::Error::Neo4j(_) => "Neo4jError",
        neo4rs::Error::UnsupportedVersion(_) => "UnsupportedVersion",
        neo4rs::Error::UnexpectedMessage(_) => "UnexpectedMessage",
        neo4rs::Error::AuthenticationError(_) => "AuthenticationError",
        neo4rs::Error::DeserializationError(_) => "DeserializationError",
        _ => "DriverError",
    }
}
