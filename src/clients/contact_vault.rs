use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tonic::{
    Request,
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    models::contact::{Contact, PersonContacts},
};

/// Wire messages of the `contacts.Vault` service.
pub mod pb {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct GetContactsRequest {
        #[prost(string, tag = "1")]
        pub person_uuid: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Contact {
        #[prost(string, tag = "1")]
        pub person_uuid: String,
        #[prost(string, tag = "2")]
        pub channel: String,
        #[prost(string, tag = "3")]
        pub destination: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct GetContactsResponse {
        #[prost(message, repeated, tag = "1")]
        pub contacts: Vec<Contact>,
        #[prost(string, tag = "2")]
        pub error: String,
    }
}

const GET_CONTACTS_PATH: &str = "/contacts.Vault/GetContacts";

/// Source of per-recipient delivery addresses.
#[async_trait]
pub trait ContactVault: Send + Sync {
    async fn find_by_person_uuid(&self, person_uuid: Uuid) -> Result<PersonContacts, Error>;
}

pub struct GrpcContactVault {
    channel: Channel,
    circuit_breaker: CircuitBreaker,
}

impl GrpcContactVault {
    /// The connection is established on first use.
    pub fn connect_lazy(
        url: &str,
        timeout: Duration,
        circuit_breaker: CircuitBreaker,
    ) -> Result<Self, Error> {
        let channel = Endpoint::from_shared(url.to_string())
            .map_err(|e| anyhow!("Invalid contact vault url {}: {}", url, e))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();

        Ok(Self {
            channel,
            circuit_breaker,
        })
    }

    async fn get_contacts(
        channel: Channel,
        request: pb::GetContactsRequest,
    ) -> Result<pb::GetContactsResponse, Error> {
        let mut grpc = Grpc::new(channel);

        grpc.ready()
            .await
            .map_err(|e| anyhow!("Contact vault is not ready: {}", e))?;

        let codec = ProstCodec::<pb::GetContactsRequest, pb::GetContactsResponse>::default();
        let path = PathAndQuery::from_static(GET_CONTACTS_PATH);

        let response = grpc
            .unary(Request::new(request), path, codec)
            .await
            .map_err(|status| {
                anyhow!(
                    "Contact vault call failed ({:?}): {}",
                    status.code(),
                    status.message()
                )
            })?;

        Ok(response.into_inner())
    }
}

pub fn contacts_from_response(
    person_uuid: Uuid,
    response: pb::GetContactsResponse,
) -> Result<PersonContacts, Error> {
    if !response.error.is_empty() {
        return Err(anyhow!("Contact vault error: {}", response.error));
    }

    let contacts = response
        .contacts
        .into_iter()
        .map(|contact| Contact {
            channel: contact.channel,
            destination: contact.destination,
        })
        .collect();

    Ok(PersonContacts {
        person_uuid,
        contacts,
    })
}

#[async_trait]
impl ContactVault for GrpcContactVault {
    async fn find_by_person_uuid(&self, person_uuid: Uuid) -> Result<PersonContacts, Error> {
        debug!(person_uuid = %person_uuid, "Requesting contacts from vault");

        let request = pb::GetContactsRequest {
            person_uuid: person_uuid.to_string(),
        };
        let channel = self.channel.clone();

        let response = self
            .circuit_breaker
            .call(|| Self::get_contacts(channel, request))
            .await?;

        contacts_from_response(person_uuid, response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        clients::circuit_breaker::MemoryCircuitStore,
        models::circuit_breaker::CircuitBreakerConfig,
    };

    #[test]
    fn response_contacts_are_mapped_in_order() {
        let person_uuid = Uuid::new_v4();
        let response = pb::GetContactsResponse {
            contacts: vec![
                pb::Contact {
                    person_uuid: person_uuid.to_string(),
                    channel: "sms".to_string(),
                    destination: "+79876543210".to_string(),
                },
                pb::Contact {
                    person_uuid: person_uuid.to_string(),
                    channel: "mail".to_string(),
                    destination: "dummy@mail.com".to_string(),
                },
            ],
            error: String::new(),
        };

        let contacts = contacts_from_response(person_uuid, response).unwrap();

        assert_eq!(contacts.person_uuid, person_uuid);
        assert_eq!(
            contacts.contacts,
            vec![
                Contact {
                    channel: "sms".to_string(),
                    destination: "+79876543210".to_string(),
                },
                Contact {
                    channel: "mail".to_string(),
                    destination: "dummy@mail.com".to_string(),
                },
            ]
        );
    }

    #[test]
    fn response_error_is_surfaced() {
        let response = pb::GetContactsResponse {
            contacts: vec![],
            error: "Bad request".to_string(),
        };

        assert!(contacts_from_response(Uuid::new_v4(), response).is_err());
    }

    #[test]
    fn invalid_url_is_rejected() {
        let breaker = CircuitBreaker::new(
            "contact_vault",
            Arc::new(MemoryCircuitStore::new()),
            CircuitBreakerConfig {
                failure_threshold: 3,
                timeout_seconds: 30,
                success_threshold: 1,
            },
        );

        let result =
            GrpcContactVault::connect_lazy("not a url", Duration::from_millis(100), breaker);

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_vault_returns_error() {
        let breaker = CircuitBreaker::new(
            "contact_vault",
            Arc::new(MemoryCircuitStore::new()),
            CircuitBreakerConfig {
                failure_threshold: 3,
                timeout_seconds: 30,
                success_threshold: 1,
            },
        );
        let vault =
            GrpcContactVault::connect_lazy("http://127.0.0.1:1", Duration::from_millis(500), breaker)
                .unwrap();

        assert!(vault.find_by_person_uuid(Uuid::new_v4()).await.is_err());
    }
}
