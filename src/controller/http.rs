/// HTTP implementation of the controller client
use crate::{
    config::ControllerConfig,
    controller::{
        wire::{CentralMember, CentralNetwork, LocalMember, LocalNetwork, LocalPeer},
        ControllerClient, ControllerMember, MemberIndex, MemberUpdate, NetworkDescriptor,
        NetworkInfo,
    },
    error::{WardenError, WardenResult},
    store::MembershipStore,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, sync::Arc};

/// Resolved controller endpoint for one call
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    base: String,
    auth: Auth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    /// Local service, `X-ZT1-Auth` header
    Local(String),
    /// Central, `Authorization: token ...`
    Central(String),
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    fn is_central(&self) -> bool {
        matches!(self.auth, Auth::Central(_))
    }
}

/// Controller client talking to the ZeroTier service API or Central
#[derive(Clone)]
pub struct HttpControllerClient {
    http: reqwest::Client,
    config: ControllerConfig,
    /// Source of per-owner local controller overrides
    overrides: Option<Arc<dyn MembershipStore>>,
}

impl HttpControllerClient {
    /// Create a new controller client
    pub fn new(
        config: ControllerConfig,
        overrides: Option<Arc<dyn MembershipStore>>,
    ) -> WardenResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()
            .map_err(|e| WardenError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            overrides,
        })
    }

    async fn endpoint(&self, owner_id: &str, use_remote_controller: bool) -> WardenResult<Endpoint> {
        if use_remote_controller {
            let token = self.config.central_token.clone().ok_or_else(|| {
                WardenError::Controller("Central API token is not configured".to_string())
            })?;
            return Ok(Endpoint {
                base: self.config.central_url.clone(),
                auth: Auth::Central(token),
            });
        }

        let mut endpoint = Endpoint {
            base: self.config.local_url.clone(),
            auth: Auth::Local(self.config.local_secret.clone()),
        };

        if let Some(store) = &self.overrides {
            if let Some(ov) = store.controller_override(owner_id).await? {
                tracing::debug!("Using controller override for owner {}", owner_id);
                if let Some(url) = ov.local_url {
                    endpoint.base = url;
                }
                if let Some(secret) = ov.local_secret {
                    endpoint.auth = Auth::Local(secret);
                }
            }
        }

        Ok(endpoint)
    }

    fn request(&self, method: reqwest::Method, endpoint: &Endpoint, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, endpoint.url(path));
        match &endpoint.auth {
            Auth::Local(secret) => builder.header("X-ZT1-Auth", secret.trim()),
            Auth::Central(token) => builder.header("Authorization", format!("token {}", token.trim())),
        }
    }

    /// GET returning `None` on 404
    async fn get_optional<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        path: &str,
    ) -> WardenResult<Option<T>> {
        let response = self
            .request(reqwest::Method::GET, endpoint, path)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(WardenError::ControllerStatus {
                status: response.status().as_u16(),
                url: endpoint.url(path),
            });
        }

        let body = response
            .json()
            .await
            .map_err(|e| WardenError::Controller(format!("Invalid response from {}: {}", path, e)))?;

        Ok(Some(body))
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &Endpoint, path: &str) -> WardenResult<T> {
        self.get_optional(endpoint, path).await?.ok_or_else(|| WardenError::ControllerStatus {
            status: StatusCode::NOT_FOUND.as_u16(),
            url: endpoint.url(path),
        })
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        path: &str,
        body: &B,
    ) -> WardenResult<T> {
        let response = self
            .request(reqwest::Method::POST, endpoint, path)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WardenError::ControllerStatus {
                status: response.status().as_u16(),
                url: endpoint.url(path),
            });
        }

        response
            .json()
            .await
            .map_err(|e| WardenError::Controller(format!("Invalid response from {}: {}", path, e)))
    }

    /// Peer lookups are best effort; an unreachable peer is reported as absent
    async fn local_peer(&self, endpoint: &Endpoint, member_id: &str) -> Option<LocalPeer> {
        match self.get_optional(endpoint, &format!("/peer/{}", member_id)).await {
            Ok(peer) => peer,
            Err(e) => {
                tracing::debug!("Peer lookup for {} failed: {}", member_id, e);
                None
            }
        }
    }

    async fn local_network_info(&self, endpoint: &Endpoint, nwid: &str) -> WardenResult<Option<NetworkInfo>> {
        let network: Option<LocalNetwork> = self
            .get_optional(endpoint, &format!("/controller/network/{}", nwid))
            .await?;
        let Some(network) = network else {
            return Ok(None);
        };

        let index: Option<HashMap<String, u64>> = self
            .get_optional(endpoint, &format!("/controller/network/{}/member", nwid))
            .await?;
        let Some(index) = index else {
            return Ok(Some(NetworkInfo {
                network: network.into(),
                members: None,
            }));
        };

        let mut ids: Vec<String> = index.into_keys().collect();
        ids.sort();

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let member: Option<LocalMember> = self
                .get_optional(endpoint, &format!("/controller/network/{}/member/{}", nwid, id))
                .await?;
            // Removed between listing and lookup
            let Some(member) = member else {
                continue;
            };

            let peer = self.local_peer(endpoint, &id).await.map(Into::into);
            members.push(member.into_member(peer));
        }

        Ok(Some(NetworkInfo {
            network: network.into(),
            members: Some(members),
        }))
    }

    async fn central_network_info(&self, endpoint: &Endpoint, nwid: &str) -> WardenResult<Option<NetworkInfo>> {
        let network: Option<CentralNetwork> = self
            .get_optional(endpoint, &format!("/network/{}", nwid))
            .await?;
        let Some(network) = network else {
            return Ok(None);
        };

        let members: Option<Vec<CentralMember>> = self
            .get_optional(endpoint, &format!("/network/{}/member", nwid))
            .await?;

        Ok(Some(NetworkInfo {
            network: NetworkDescriptor::from(network),
            members: members.map(|list| list.into_iter().map(ControllerMember::from).collect()),
        }))
    }
}

#[async_trait]
impl ControllerClient for HttpControllerClient {
    async fn list_members(
        &self,
        owner_id: &str,
        nwid: &str,
        use_remote_controller: bool,
    ) -> WardenResult<MemberIndex> {
        let endpoint = self.endpoint(owner_id, use_remote_controller).await?;

        if endpoint.is_central() {
            let members: Vec<CentralMember> = self
                .get_json(&endpoint, &format!("/network/{}/member", nwid))
                .await?;
            return Ok(members
                .into_iter()
                .map(|m| (m.node_id, m.config.revision))
                .collect());
        }

        let index: HashMap<String, u64> = self
            .get_json(&endpoint, &format!("/controller/network/{}/member", nwid))
            .await?;
        Ok(index.into_iter().collect())
    }

    async fn update_member(
        &self,
        owner_id: &str,
        nwid: &str,
        member_id: &str,
        params: &MemberUpdate,
        use_remote_controller: bool,
    ) -> WardenResult<ControllerMember> {
        let endpoint = self.endpoint(owner_id, use_remote_controller).await?;

        if endpoint.is_central() {
            let body = serde_json::json!({ "config": params });
            let member: CentralMember = self
                .post_json(&endpoint, &format!("/network/{}/member/{}", nwid, member_id), &body)
                .await?;
            return Ok(member.into());
        }

        let member: LocalMember = self
            .post_json(
                &endpoint,
                &format!("/controller/network/{}/member/{}", nwid, member_id),
                params,
            )
            .await?;
        Ok(member.into_member(None))
    }

    async fn get_network_info(
        &self,
        owner_id: &str,
        nwid: &str,
        use_remote_controller: bool,
    ) -> WardenResult<Option<NetworkInfo>> {
        let endpoint = self.endpoint(owner_id, use_remote_controller).await?;

        if endpoint.is_central() {
            self.central_network_info(&endpoint, nwid).await
        } else {
            self.local_network_info(&endpoint, nwid).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, store::SqliteMembershipStore};

    fn config() -> ControllerConfig {
        ControllerConfig {
            local_url: "http://127.0.0.1:9993/".to_string(),
            local_secret: "local-secret\n".to_string(),
            central_url: "https://api.zerotier.com/api/v1".to_string(),
            central_token: None,
            timeout_secs: 5,
            user_agent: "netwarden/test".to_string(),
        }
    }

    #[test]
    fn test_endpoint_url_joins_paths() {
        let endpoint = Endpoint {
            base: "http://127.0.0.1:9993/".to_string(),
            auth: Auth::Local("s".to_string()),
        };
        assert_eq!(
            endpoint.url("/controller/network/abc"),
            "http://127.0.0.1:9993/controller/network/abc"
        );
    }

    #[tokio::test]
    async fn test_local_endpoint_defaults() {
        let client = HttpControllerClient::new(config(), None).unwrap();
        let endpoint = client.endpoint("u1", false).await.unwrap();
        assert_eq!(endpoint.base, "http://127.0.0.1:9993/");
        assert_eq!(endpoint.auth, Auth::Local("local-secret\n".to_string()));
        assert!(!endpoint.is_central());
    }

    #[tokio::test]
    async fn test_central_requires_token() {
        let client = HttpControllerClient::new(config(), None).unwrap();
        assert!(matches!(
            client.endpoint("u1", true).await,
            Err(WardenError::Controller(_))
        ));

        let mut cfg = config();
        cfg.central_token = Some("tok".to_string());
        let client = HttpControllerClient::new(cfg, None).unwrap();
        let endpoint = client.endpoint("u1", true).await.unwrap();
        assert!(endpoint.is_central());
        assert_eq!(endpoint.url("/network/x"), "https://api.zerotier.com/api/v1/network/x");
    }

    #[tokio::test]
    async fn test_owner_override_applies_to_local_calls() {
        let pool = db::memory_pool().await.unwrap();
        sqlx::query("INSERT INTO user (id, role) VALUES ('u1', 'USER')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO user_options (user_id, local_controller_url, local_controller_secret) VALUES ('u1', 'http://10.0.0.7:9993', 'other')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let store: Arc<dyn MembershipStore> = Arc::new(SqliteMembershipStore::new(pool));
        let client = HttpControllerClient::new(config(), Some(store)).unwrap();

        let endpoint = client.endpoint("u1", false).await.unwrap();
        assert_eq!(endpoint.base, "http://10.0.0.7:9993");
        assert_eq!(endpoint.auth, Auth::Local("other".to_string()));

        let endpoint = client.endpoint("someone-else", false).await.unwrap();
        assert_eq!(endpoint.base, "http://127.0.0.1:9993/");
    }

    mod against_stub {
        use super::*;
        use axum::{
            extract::State,
            http::{HeaderMap, StatusCode, Uri},
            routing::{get, MethodRouter},
            Json, Router,
        };
        use serde_json::{json, Value};
        use std::sync::Mutex;

        const NWID: &str = "8056c2e21c000001";

        #[derive(Debug, Clone)]
        struct Recorded {
            method: String,
            path: String,
            zt_auth: Option<String>,
            authorization: Option<String>,
            body: Value,
        }

        #[derive(Clone, Default)]
        struct Seen(Arc<Mutex<Vec<Recorded>>>);

        impl Seen {
            fn record(&self, method: &str, uri: &Uri, headers: &HeaderMap, body: Value) {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                self.0.lock().unwrap().push(Recorded {
                    method: method.to_string(),
                    path: uri.path().to_string(),
                    zt_auth: header("x-zt1-auth"),
                    authorization: header("authorization"),
                    body,
                });
            }

            fn all(&self) -> Vec<Recorded> {
                self.0.lock().unwrap().clone()
            }

            fn posts(&self) -> Vec<Recorded> {
                self.all().into_iter().filter(|r| r.method == "POST").collect()
            }
        }

        fn canned(status: StatusCode, body: Value) -> MethodRouter<Seen> {
            get(move |State(seen): State<Seen>, uri: Uri, headers: HeaderMap| {
                let body = body.clone();
                async move {
                    seen.record("GET", &uri, &headers, Value::Null);
                    (status, Json(body))
                }
            })
        }

        async fn local_update(
            State(seen): State<Seen>,
            uri: Uri,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            seen.record("POST", &uri, &headers, body.clone());
            Json(json!({
                "id": "a1",
                "nwid": NWID,
                "authorized": body["authorized"],
                "revision": 4,
                "vMajor": 1, "vMinor": 14, "vRev": 2
            }))
        }

        async fn central_update(
            State(seen): State<Seen>,
            uri: Uri,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            seen.record("POST", &uri, &headers, body.clone());
            Json(json!({
                "nodeId": "a1",
                "networkId": NWID,
                "config": { "authorized": body["config"]["authorized"], "revision": 6 }
            }))
        }

        /// Local service and Central endpoints for one network
        async fn stub() -> (String, Seen) {
            let ok = StatusCode::OK;
            let seen = Seen::default();
            let app = Router::new()
                .route(
                    &format!("/controller/network/{}", NWID),
                    canned(ok, json!({ "id": NWID, "name": "lab", "private": true })),
                )
                .route(
                    &format!("/controller/network/{}/member", NWID),
                    canned(ok, json!({ "b2": 1, "a1": 3 })),
                )
                .route(
                    &format!("/controller/network/{}/member/a1", NWID),
                    canned(
                        ok,
                        json!({
                            "id": "a1", "nwid": NWID, "authorized": true,
                            "ipAssignments": ["10.147.17.5"], "revision": 3,
                            "vMajor": 1, "vMinor": 14, "vRev": 2
                        }),
                    )
                    .post(local_update),
                )
                .route(
                    &format!("/controller/network/{}/member/b2", NWID),
                    canned(
                        ok,
                        json!({ "id": "b2", "nwid": NWID, "authorized": false, "revision": 1 }),
                    ),
                )
                .route(
                    "/peer/a1",
                    canned(
                        ok,
                        json!({
                            "address": "a1", "latency": 12, "role": "LEAF", "version": "1.14.2",
                            "paths": [{
                                "address": "192.168.1.20/9993", "active": true,
                                "expired": false, "preferred": true,
                                "lastReceive": 1717000000000_i64
                            }]
                        }),
                    ),
                )
                .route("/peer/b2", canned(StatusCode::INTERNAL_SERVER_ERROR, json!({})))
                .route(
                    "/controller/network/deadbeef00000000",
                    canned(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "boom" })),
                )
                .route(
                    &format!("/network/{}/member", NWID),
                    canned(
                        ok,
                        json!([
                            { "nodeId": "a1", "networkId": NWID,
                              "config": { "authorized": true, "revision": 5 } },
                            { "nodeId": "b2", "networkId": NWID,
                              "config": { "authorized": false, "revision": 2 } }
                        ]),
                    ),
                )
                .route(
                    &format!("/network/{}/member/a1", NWID),
                    axum::routing::post(central_update),
                )
                .with_state(seen.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            (format!("http://{}", addr), seen)
        }

        fn client(base: &str) -> HttpControllerClient {
            let mut cfg = config();
            cfg.local_url = base.to_string();
            cfg.central_url = base.to_string();
            cfg.central_token = Some("tok".to_string());
            HttpControllerClient::new(cfg, None).unwrap()
        }

        #[tokio::test]
        async fn test_network_info_with_members_and_peers() {
            let (base, seen) = stub().await;
            let client = client(&base);

            let info = client.get_network_info("u1", NWID, false).await.unwrap().unwrap();

            assert_eq!(info.network.id, NWID);
            assert_eq!(info.network.name.as_deref(), Some("lab"));
            let members = info.members.unwrap();
            let ids: Vec<_> = members.iter().map(|m| m.id.as_str()).collect();
            assert_eq!(ids, vec!["a1", "b2"]);

            let a1 = &members[0];
            assert_eq!(a1.client_version.as_deref(), Some("1.14.2"));
            let peer = a1.peer.as_ref().unwrap();
            assert_eq!(peer.active_path().unwrap().address, "192.168.1.20/9993");

            // Peer lookup failed with 500; the member is still reported
            assert!(members[1].peer.is_none());

            let requests = seen.all();
            assert!(!requests.is_empty());
            for request in requests {
                assert_eq!(request.zt_auth.as_deref(), Some("local-secret"), "{}", request.path);
                assert_eq!(request.authorization, None);
            }
        }

        #[tokio::test]
        async fn test_unknown_network_is_none_and_failures_carry_status() {
            let (base, _seen) = stub().await;
            let client = client(&base);

            assert!(client
                .get_network_info("u1", "ffffffffffffffff", false)
                .await
                .unwrap()
                .is_none());

            match client.get_network_info("u1", "deadbeef00000000", false).await {
                Err(WardenError::ControllerStatus { status, url }) => {
                    assert_eq!(status, 500);
                    assert!(url.ends_with("/controller/network/deadbeef00000000"));
                }
                other => panic!("unexpected result: {:?}", other.map(|_| ())),
            }

            assert!(matches!(
                client.list_members("u1", "ffffffffffffffff", false).await,
                Err(WardenError::ControllerStatus { status: 404, .. })
            ));
        }

        #[tokio::test]
        async fn test_local_list_and_deauthorize() {
            let (base, seen) = stub().await;
            let client = client(&base);

            let index = client.list_members("u1", NWID, false).await.unwrap();
            assert_eq!(index.into_iter().collect::<Vec<_>>(), vec![("a1".to_string(), 3), ("b2".to_string(), 1)]);

            let member = client
                .update_member("u1", NWID, "a1", &MemberUpdate::deauthorize(), false)
                .await
                .unwrap();
            assert!(!member.authorized);

            let posts = seen.posts();
            assert_eq!(posts.len(), 1);
            assert_eq!(posts[0].path, format!("/controller/network/{}/member/a1", NWID));
            assert_eq!(posts[0].body, json!({ "authorized": false }));
            assert_eq!(posts[0].zt_auth.as_deref(), Some("local-secret"));
        }

        #[tokio::test]
        async fn test_central_uses_token_and_config_body() {
            let (base, seen) = stub().await;
            let client = client(&base);

            let index = client.list_members("u1", NWID, true).await.unwrap();
            assert_eq!(index.get("a1"), Some(&5));
            assert_eq!(index.get("b2"), Some(&2));

            let member = client
                .update_member("u1", NWID, "a1", &MemberUpdate::deauthorize(), true)
                .await
                .unwrap();
            assert!(!member.authorized);
            assert_eq!(member.revision, 6);

            let posts = seen.posts();
            assert_eq!(posts.len(), 1);
            assert_eq!(posts[0].body, json!({ "config": { "authorized": false } }));

            for request in seen.all() {
                assert_eq!(request.authorization.as_deref(), Some("token tok"));
                assert_eq!(request.zt_auth, None);
            }
        }
    }
}
