//! The external health store adapter contract.
//!
//! The coordinator only ever talks to the platform health database through
//! [`ExternalHealthStore`]. Records are correlated by `(category, window)`:
//! the external store has no notion of local record ids.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use healthsync_core::{Category, HealthRecord, TimeWindow};

use crate::error::ExternalStoreError;

/// Write permission state for one category (or one underlying permission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    #[default]
    NotDetermined,
    Authorized,
    Denied,
}

impl AuthorizationState {
    /// State of a category that needs both `self` and `other`.
    ///
    /// Any undetermined permission leaves the whole undetermined; otherwise a
    /// single denial denies the whole.
    pub fn combine(self, other: Self) -> Self {
        use AuthorizationState::*;
        match (self, other) {
            (Authorized, Authorized) => Authorized,
            (NotDetermined, _) | (_, NotDetermined) => NotDetermined,
            _ => Denied,
        }
    }

    pub fn is_authorized(self) -> bool {
        self == AuthorizationState::Authorized
    }
}

/// Individual platform permissions. Blood pressure needs two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    BodyMass,
    Height,
    BloodPressureSystolic,
    BloodPressureDiastolic,
    HeartRate,
    BloodGlucose,
    BodyTemperature,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::BodyMass,
        Permission::Height,
        Permission::BloodPressureSystolic,
        Permission::BloodPressureDiastolic,
        Permission::HeartRate,
        Permission::BloodGlucose,
        Permission::BodyTemperature,
    ];

    /// Permissions that must all be authorized before `category` can be written.
    pub fn for_category(category: Category) -> &'static [Permission] {
        match category {
            Category::Weight => &[Permission::BodyMass],
            Category::Height => &[Permission::Height],
            Category::BloodPressure => &[
                Permission::BloodPressureSystolic,
                Permission::BloodPressureDiastolic,
            ],
            Category::HeartRate => &[Permission::HeartRate],
            Category::BloodGlucose => &[Permission::BloodGlucose],
            Category::BodyTemperature => &[Permission::BodyTemperature],
        }
    }
}

/// Contract for the platform health database.
///
/// Implementations must be safe to call from any task. No method holds any
/// coordinator lock while awaiting.
#[async_trait]
pub trait ExternalHealthStore: Send + Sync {
    /// Write a new sample for `record` (a linked pair for blood pressure).
    ///
    /// Fails with [`ExternalStoreError::Unauthorized`] when the category is
    /// not authorized and [`ExternalStoreError::Validation`] when the record is
    /// malformed.
    async fn write(&self, record: &HealthRecord) -> Result<(), ExternalStoreError>;

    /// Remove every sample of `category` inside `window`. Finding nothing is
    /// not an error.
    async fn delete(&self, category: Category, window: TimeWindow)
        -> Result<(), ExternalStoreError>;

    /// Whether any sample of `category` lies inside `window`.
    async fn exists(&self, category: Category, window: TimeWindow)
        -> Result<bool, ExternalStoreError>;

    fn authorization_state(&self, category: Category) -> AuthorizationState;
}

#[async_trait]
impl<E: ExternalHealthStore + ?Sized> ExternalHealthStore for Arc<E> {
    async fn write(&self, record: &HealthRecord) -> Result<(), ExternalStoreError> {
        (**self).write(record).await
    }

    async fn delete(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<(), ExternalStoreError> {
        (**self).delete(category, window).await
    }

    async fn exists(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<bool, ExternalStoreError> {
        (**self).exists(category, window).await
    }

    fn authorization_state(&self, category: Category) -> AuthorizationState {
        (**self).authorization_state(category)
    }
}

/// Adapter wrapper that bounds every async call with a timeout.
///
/// A call that exceeds `limit` fails with [`ExternalStoreError::Timeout`]; the
/// inner future is dropped.
#[derive(Debug, Clone)]
pub struct WithTimeout<E> {
    inner: E,
    limit: Duration,
}

impl<E> WithTimeout<E> {
    pub fn new(inner: E, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: ExternalHealthStore> ExternalHealthStore for WithTimeout<E> {
    async fn write(&self, record: &HealthRecord) -> Result<(), ExternalStoreError> {
        tokio::time::timeout(self.limit, self.inner.write(record))
            .await
            .map_err(|_| ExternalStoreError::Timeout(self.limit))?
    }

    async fn delete(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<(), ExternalStoreError> {
        tokio::time::timeout(self.limit, self.inner.delete(category, window))
            .await
            .map_err(|_| ExternalStoreError::Timeout(self.limit))?
    }

    async fn exists(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<bool, ExternalStoreError> {
        tokio::time::timeout(self.limit, self.inner.exists(category, window))
            .await
            .map_err(|_| ExternalStoreError::Timeout(self.limit))?
    }

    fn authorization_state(&self, category: Category) -> AuthorizationState {
        self.inner.authorization_state(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use AuthorizationState::*;

    #[rstest]
    #[case(Authorized, Authorized, Authorized)]
    #[case(Authorized, Denied, Denied)]
    #[case(Denied, Authorized, Denied)]
    #[case(Authorized, NotDetermined, NotDetermined)]
    #[case(NotDetermined, Denied, NotDetermined)]
    #[case(Denied, Denied, Denied)]
    fn combine_table(
        #[case] a: AuthorizationState,
        #[case] b: AuthorizationState,
        #[case] expected: AuthorizationState,
    ) {
        assert_eq!(a.combine(b), expected);
    }

    #[test]
    fn blood_pressure_needs_both_permissions() {
        assert_eq!(Permission::for_category(Category::BloodPressure).len(), 2);
        for category in Category::ALL {
            assert!(!Permission::for_category(category).is_empty());
        }
    }
}
