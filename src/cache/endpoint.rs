//! Endpoint declarations and the registry that erases them by name.
//!
//! Endpoints are declared as types: a query says how to build its request and
//! which tags its result provides, a mutation says how to build its request and
//! which tags a successful result invalidates. The registry keeps a type-erased,
//! JSON-level view of every declaration so cache entries can be refetched from
//! nothing but their signature.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use super::error::QueryError;
use super::tag::Tag;
use crate::transport::RequestDescriptor;

/// A read endpoint whose results are cached.
pub trait QueryEndpoint: Send + Sync + 'static {
  type Arg: Serialize + DeserializeOwned + Send + Sync;
  type Output: Serialize + DeserializeOwned + Send + Sync;

  /// Unique endpoint name (e.g. "listLabels").
  const NAME: &'static str;

  /// Build the request for `arg`, rejecting malformed arguments.
  fn build_request(arg: &Self::Arg) -> Result<RequestDescriptor, QueryError>;

  /// Tags attached to a successful result.
  fn provides_tags(_result: &Self::Output, _arg: &Self::Arg) -> Vec<Tag> {
    Vec::new()
  }
}

/// A write endpoint that never creates a cache entry of its own.
pub trait MutationEndpoint: Send + Sync + 'static {
  type Arg: Serialize + DeserializeOwned + Send + Sync;
  type Output: Serialize + DeserializeOwned + Send + Sync;

  const NAME: &'static str;

  fn build_request(arg: &Self::Arg) -> Result<RequestDescriptor, QueryError>;

  /// Tags staled after the mutation succeeds.
  fn invalidates_tags(_result: &Self::Output, _arg: &Self::Arg) -> Vec<Tag> {
    Vec::new()
  }
}

/// JSON-level view of a query declaration.
#[derive(Clone, Copy)]
pub struct QueryDecl {
  pub name: &'static str,
  build: fn(&Value) -> Result<RequestDescriptor, QueryError>,
  provides: fn(&Value, &Value) -> Result<Vec<Tag>, QueryError>,
}

impl QueryDecl {
  pub fn of<E: QueryEndpoint>() -> Self {
    Self {
      name: E::NAME,
      build: build_query::<E>,
      provides: provides_tags::<E>,
    }
  }

  pub fn build_request(&self, arg: &Value) -> Result<RequestDescriptor, QueryError> {
    (self.build)(arg)
  }

  pub fn provides_tags(&self, result: &Value, arg: &Value) -> Result<Vec<Tag>, QueryError> {
    (self.provides)(result, arg)
  }
}

/// JSON-level view of a mutation declaration.
#[derive(Clone, Copy)]
pub struct MutationDecl {
  pub name: &'static str,
  build: fn(&Value) -> Result<RequestDescriptor, QueryError>,
  invalidates: fn(&Value, &Value) -> Result<Vec<Tag>, QueryError>,
}

impl MutationDecl {
  pub fn of<E: MutationEndpoint>() -> Self {
    Self {
      name: E::NAME,
      build: build_mutation::<E>,
      invalidates: invalidates_tags::<E>,
    }
  }

  pub fn build_request(&self, arg: &Value) -> Result<RequestDescriptor, QueryError> {
    (self.build)(arg)
  }

  pub fn invalidates_tags(&self, result: &Value, arg: &Value) -> Result<Vec<Tag>, QueryError> {
    (self.invalidates)(result, arg)
  }
}

fn decode_arg<A: DeserializeOwned>(endpoint: &str, arg: &Value) -> Result<A, QueryError> {
  serde_json::from_value(arg.clone()).map_err(|e| QueryError::validation(endpoint, e.to_string()))
}

fn build_query<E: QueryEndpoint>(arg: &Value) -> Result<RequestDescriptor, QueryError> {
  E::build_request(&decode_arg::<E::Arg>(E::NAME, arg)?)
}

fn provides_tags<E: QueryEndpoint>(result: &Value, arg: &Value) -> Result<Vec<Tag>, QueryError> {
  let arg: E::Arg = decode_arg(E::NAME, arg)?;
  let result: E::Output = serde_json::from_value(result.clone())?;
  Ok(E::provides_tags(&result, &arg))
}

fn build_mutation<E: MutationEndpoint>(arg: &Value) -> Result<RequestDescriptor, QueryError> {
  E::build_request(&decode_arg::<E::Arg>(E::NAME, arg)?)
}

fn invalidates_tags<E: MutationEndpoint>(
  result: &Value,
  arg: &Value,
) -> Result<Vec<Tag>, QueryError> {
  let arg: E::Arg = decode_arg(E::NAME, arg)?;
  let result: E::Output = serde_json::from_value(result.clone())?;
  Ok(E::invalidates_tags(&result, &arg))
}

/// Reject an empty required identifier.
pub fn require<'a>(endpoint: &str, field: &str, value: &'a str) -> Result<&'a str, QueryError> {
  if value.trim().is_empty() {
    Err(QueryError::validation(endpoint, format!("{} is required", field)))
  } else {
    Ok(value)
  }
}

#[derive(Default)]
struct Declarations {
  queries: HashMap<&'static str, QueryDecl>,
  mutations: HashMap<&'static str, MutationDecl>,
}

/// Name-indexed store of endpoint declarations.
#[derive(Default)]
pub struct EndpointRegistry {
  declarations: RwLock<Declarations>,
}

impl EndpointRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_query<E: QueryEndpoint>(&self) {
    let mut decls = self
      .declarations
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    if !decls.queries.contains_key(E::NAME) {
      debug!(endpoint = E::NAME, "Registered query endpoint");
      decls.queries.insert(E::NAME, QueryDecl::of::<E>());
    }
  }

  pub fn register_mutation<E: MutationEndpoint>(&self) {
    let mut decls = self
      .declarations
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    if !decls.mutations.contains_key(E::NAME) {
      debug!(endpoint = E::NAME, "Registered mutation endpoint");
      decls.mutations.insert(E::NAME, MutationDecl::of::<E>());
    }
  }

  pub fn query(&self, name: &str) -> Result<QueryDecl, QueryError> {
    self
      .declarations
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .queries
      .get(name)
      .copied()
      .ok_or_else(|| QueryError::UnknownEndpoint(name.to_string()))
  }

  pub fn mutation(&self, name: &str) -> Result<MutationDecl, QueryError> {
    self
      .declarations
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .mutations
      .get(name)
      .copied()
      .ok_or_else(|| QueryError::UnknownEndpoint(name.to_string()))
  }

  /// Registered query names, sorted.
  pub fn query_names(&self) -> Vec<&'static str> {
    let decls = self
      .declarations
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    let mut names: Vec<_> = decls.queries.keys().copied().collect();
    names.sort_unstable();
    names
  }

  /// Registered mutation names, sorted.
  pub fn mutation_names(&self) -> Vec<&'static str> {
    let decls = self
      .declarations
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    let mut names: Vec<_> = decls.mutations.keys().copied().collect();
    names.sort_unstable();
    names
  }
}
