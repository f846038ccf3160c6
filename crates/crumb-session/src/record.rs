//! Session records: control metadata plus attribute data.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::codec;
use crate::error::{Result, SessionError};
use crate::token::TokenSegments;
use crate::value::{AttributeMap, AttributeValue};

/// Control map key for the session id.
pub const SESSION_ID_KEY: &str = "sessionId";
/// Control map key for the creation time (epoch millis).
pub const CREATED_AT_KEY: &str = "createdAt";
/// Control map key for the last access time (epoch millis).
pub const LAST_ACCESSED_AT_KEY: &str = "lastAccessedAt";
/// Control map key for the inactivity timeout.
pub const INACTIVITY_TIMEOUT_KEY: &str = "inactivityTimeoutSeconds";

/// Fixed-schema session metadata carried in the control segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlData {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Negative disables inactivity expiry.
    pub inactivity_timeout_seconds: i64,
}

impl ControlData {
    /// Render as the control attribute map.
    pub fn to_map(&self) -> AttributeMap {
        let mut map = AttributeMap::new();
        map.insert(SESSION_ID_KEY.to_string(), self.session_id.clone().into());
        map.insert(
            CREATED_AT_KEY.to_string(),
            self.created_at.timestamp_millis().into(),
        );
        map.insert(
            LAST_ACCESSED_AT_KEY.to_string(),
            self.last_accessed_at.timestamp_millis().into(),
        );
        map.insert(
            INACTIVITY_TIMEOUT_KEY.to_string(),
            self.inactivity_timeout_seconds.into(),
        );
        map
    }

    /// Parse a decoded control map. Missing or mistyped keys are `Decoding`
    /// errors since they mean the token was not produced by this crate.
    pub fn from_map(map: &AttributeMap) -> Result<Self> {
        let session_id = map
            .get(SESSION_ID_KEY)
            .and_then(AttributeValue::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| missing(SESSION_ID_KEY))?
            .to_string();

        Ok(Self {
            session_id,
            created_at: millis_field(map, CREATED_AT_KEY)?,
            last_accessed_at: millis_field(map, LAST_ACCESSED_AT_KEY)?,
            inactivity_timeout_seconds: map
                .get(INACTIVITY_TIMEOUT_KEY)
                .and_then(AttributeValue::as_i64)
                .ok_or_else(|| missing(INACTIVITY_TIMEOUT_KEY))?,
        })
    }
}

fn missing(key: &str) -> SessionError {
    SessionError::Decoding(format!("control data is missing '{}'", key))
}

fn millis_field(map: &AttributeMap, key: &str) -> Result<DateTime<Utc>> {
    map.get(key)
        .and_then(AttributeValue::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| missing(key))
}

/// Drop sub-millisecond precision so in-memory state matches the token.
fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

#[derive(Debug)]
struct RecordState {
    last_accessed_at: DateTime<Utc>,
    inactivity_timeout_seconds: i64,
    attributes: AttributeMap,
    changed: bool,
    invalidated: bool,
    is_new: bool,
}

/// A single client session.
///
/// Records are shared between concurrent requests as `Arc<SessionRecord>`;
/// mutation goes through an internal lock, last writer wins.
#[derive(Debug)]
pub struct SessionRecord {
    id: String,
    created_at: DateTime<Utc>,
    state: RwLock<RecordState>,
}

impl SessionRecord {
    /// Create a brand-new session.
    pub fn new(now: DateTime<Utc>, inactivity_timeout_seconds: i64) -> Self {
        let now = truncate_millis(now);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            state: RwLock::new(RecordState {
                last_accessed_at: now,
                inactivity_timeout_seconds,
                attributes: AttributeMap::new(),
                changed: false,
                invalidated: false,
                is_new: true,
            }),
        }
    }

    /// Wrap already-decoded control and attribute maps.
    pub fn rehydrate(control: &AttributeMap, attributes: AttributeMap) -> Result<Self> {
        Ok(Self::from_control(ControlData::from_map(control)?, attributes))
    }

    /// Wrap parsed control data and attributes.
    pub fn from_control(control: ControlData, attributes: AttributeMap) -> Self {
        Self {
            id: control.session_id,
            created_at: control.created_at,
            state: RwLock::new(RecordState {
                last_accessed_at: control.last_accessed_at,
                inactivity_timeout_seconds: control.inactivity_timeout_seconds,
                attributes,
                changed: false,
                invalidated: false,
                is_new: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.state.read().last_accessed_at
    }

    pub fn inactivity_timeout_seconds(&self) -> i64 {
        self.state.read().inactivity_timeout_seconds
    }

    /// Override the inactivity timeout for this session only.
    pub fn set_inactivity_timeout_seconds(&self, seconds: i64) {
        let mut state = self.state.write();
        if state.inactivity_timeout_seconds != seconds {
            state.inactivity_timeout_seconds = seconds;
            state.changed = true;
        }
    }

    /// Whether the session is past its absolute age or its inactivity window.
    ///
    /// Both checks use whole elapsed units and strict greater-than, so a
    /// session is still live at exactly the boundary. A negative
    /// `max_age_minutes` means no absolute age limit.
    pub fn has_expired(&self, now: DateTime<Utc>, max_age_minutes: i64) -> bool {
        if max_age_minutes >= 0 && (now - self.created_at).num_minutes() > max_age_minutes {
            return true;
        }

        let state = self.state.read();
        state.inactivity_timeout_seconds >= 0
            && (now - state.last_accessed_at).num_seconds() > state.inactivity_timeout_seconds
    }

    /// Record an access. Never moves the access time backwards.
    pub fn touch(&self, now: DateTime<Utc>) {
        let now = truncate_millis(now);
        let mut state = self.state.write();
        if now > state.last_accessed_at {
            state.last_accessed_at = now;
        }
    }

    /// Get an attribute. A missing key is `Ok(None)`.
    pub fn get(&self, key: &str) -> Result<Option<AttributeValue>> {
        let state = self.state.read();
        self.assert_valid(&state)?;
        Ok(state.attributes.get(key).cloned())
    }

    /// Get an attribute and deserialize it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };
        let json = serde_json::to_value(&value)
            .map_err(|e| SessionError::Serialization(format!("attribute '{}': {}", key, e)))?;
        serde_json::from_value(json)
            .map(Some)
            .map_err(|e| SessionError::Serialization(format!("attribute '{}': {}", key, e)))
    }

    /// Set an attribute, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Result<()> {
        let value = value.into();
        let mut state = self.state.write();
        self.assert_valid(&state)?;
        value.validate()?;

        state.attributes.insert(key.into(), value);
        state.changed = true;
        Ok(())
    }

    /// Set an attribute from any serializable value.
    ///
    /// Fails with `Serialization` if the value does not map onto the
    /// supported kinds (for example it contains a list or a null).
    pub fn set_serialized<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        let key = key.into();
        let json = serde_json::to_value(value)
            .map_err(|e| SessionError::Serialization(format!("attribute '{}': {}", key, e)))?;
        let value = AttributeValue::try_from(json)?;
        self.set(key, value)
    }

    /// Remove an attribute, returning the previous value.
    pub fn remove(&self, key: &str) -> Result<Option<AttributeValue>> {
        let mut state = self.state.write();
        self.assert_valid(&state)?;

        let removed = state.attributes.remove(key);
        if removed.is_some() {
            state.changed = true;
        }
        Ok(removed)
    }

    /// Names of all attributes.
    pub fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        self.assert_valid(&state)?;
        Ok(state.attributes.keys().cloned().collect())
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> Result<AttributeMap> {
        let state = self.state.read();
        self.assert_valid(&state)?;
        Ok(state.attributes.clone())
    }

    /// Remove every attribute.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        self.assert_valid(&state)?;

        if !state.attributes.is_empty() {
            state.attributes.clear();
            state.changed = true;
        }
        Ok(())
    }

    /// Invalidate the session and drop its attributes.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.invalidated = true;
        state.attributes.clear();
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.read().invalidated
    }

    /// True until the first token for this session has been written.
    pub fn is_new(&self) -> bool {
        self.state.read().is_new
    }

    /// True if attributes changed since the last token was written.
    pub fn is_changed(&self) -> bool {
        self.state.read().changed
    }

    /// Mark the session as written out (clears the new/changed flags).
    pub fn mark_clean(&self) {
        let mut state = self.state.write();
        state.changed = false;
        state.is_new = false;
    }

    /// Current control metadata.
    pub fn control_data(&self) -> ControlData {
        let state = self.state.read();
        ControlData {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_accessed_at: state.last_accessed_at,
            inactivity_timeout_seconds: state.inactivity_timeout_seconds,
        }
    }

    /// Encode control and attribute segments from one consistent snapshot.
    pub fn encode_segments(&self) -> Result<TokenSegments> {
        let (control, attributes) = {
            let state = self.state.read();
            let control = ControlData {
                session_id: self.id.clone(),
                created_at: self.created_at,
                last_accessed_at: state.last_accessed_at,
                inactivity_timeout_seconds: state.inactivity_timeout_seconds,
            };
            (control.to_map(), state.attributes.clone())
        };

        Ok(TokenSegments::new(
            codec::encode(&control)?,
            codec::encode(&attributes)?,
        ))
    }

    fn assert_valid(&self, state: &RecordState) -> Result<()> {
        if state.invalidated {
            Err(SessionError::InvalidatedState(self.id.clone()))
        } else {
            Ok(())
        }
    }
}
