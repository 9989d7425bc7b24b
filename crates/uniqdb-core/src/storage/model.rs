//! Typed models.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::catalog::ModelMeta;

/// A serde type stored as one kind of entity.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use uniqdb_core::{Model, ModelMeta};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     email: String,
///     first_name: String,
///     last_name: String,
/// }
///
/// impl Model for User {
///     const KIND: &'static str = "User";
///
///     fn meta() -> ModelMeta {
///         ModelMeta::new(Self::KIND)
///             .unique(["email"])
///             .unique(["first_name", "last_name"])
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned {
    /// Kind name the model is stored under.
    const KIND: &'static str;

    /// Metadata declaring the model's unique sets. None by default.
    fn meta() -> ModelMeta {
        ModelMeta::new(Self::KIND)
    }
}
