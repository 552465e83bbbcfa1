//! Named operations driven against a scripted transport.

mod common;

use std::time::Duration;

use common::{API, RecordingSleeper, Reply, ScriptedTransport, client, client_with};
use runrecord::envelope::{DevEnvelopeCodec, SessionKey};
use runrecord::transport::WireResponse;
use runrecord::{
    ApiConfig, ApiError, CreateInstanceOptions, CreateRunOptions, Error, HEADER_ENCRYPTED,
    InstanceResultsOptions, InstanceStdoutOptions, InstanceTestsOptions, PreflightSession,
};
use serde_json::json;

fn plain_session(api: &runrecord::CloudApi) -> runrecord::RecordSession {
    let session = api.new_session();
    session.replace(PreflightSession {
        encrypt: false,
        api_url: API.into(),
    });
    session
}

#[tokio::test]
async fn cacheable_read_hits_network_once_until_cleared() {
    let urls = json!({
        "dashboardAuthUrl": "https://cloud.example/login",
        "dashboardLogoutUrl": "https://cloud.example/logout",
    });
    let transport = ScriptedTransport::new()
        .on("/auth", Reply::Json(200, urls.clone()))
        .on("/auth", Reply::Json(200, urls));
    let api = client(&transport, &RecordingSleeper::default());

    let first = api.auth_urls().await.unwrap();
    let second = api.auth_urls().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.sent_to("/auth").len(), 1);
    assert_eq!(api.cache().hits(), 1);

    api.clear_cache();
    api.auth_urls().await.unwrap();
    assert_eq!(transport.sent_to("/auth").len(), 2);

    let request = &transport.sent_to("/auth")[0];
    assert_eq!(request.header("x-route-version"), Some("2"));
    assert!(request.header("x-cypress-request-attempt").is_none());
}

#[tokio::test]
async fn failed_cacheable_read_is_not_stored() {
    let transport = ScriptedTransport::new()
        .on("/auth", Reply::Json(502, json!("Bad Gateway")))
        .on("/auth", Reply::Json(200, json!({"dashboardAuthUrl": "https://x/login"})));
    let api = client(&transport, &RecordingSleeper::default());

    assert_eq!(api.auth_urls().await.unwrap_err().status_code(), Some(502));
    assert!(api.cache().is_empty());
    api.auth_urls().await.unwrap();
    assert_eq!(api.cache().len(), 1);
}

#[tokio::test]
async fn create_run_negotiates_then_posts_to_negotiated_base() {
    let transport = ScriptedTransport::new()
        .on(
            "api-proxy.example/preflight",
            Reply::Sealed(
                200,
                json!({
                    "encrypt": true,
                    "apiUrl": "https://api-east.example/",
                    "warnings": [{"code": "PREFLIGHT"}],
                }),
            ),
        )
        .on(
            "api-east.example/runs",
            Reply::Sealed(
                200,
                json!({"runId": "run-1", "warnings": [{"code": "RUN"}]}),
            ),
        );
    let sleeper = RecordingSleeper::default();
    let api = client(&transport, &sleeper);
    let session = api.new_session();

    let run = api
        .create_run(
            &session,
            &CreateRunOptions {
                project_id: "abc123".into(),
                ci_build_id: Some("build-7".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(run["runId"], "run-1");
    assert_eq!(run["warnings"], json!([{"code": "PREFLIGHT"}, {"code": "RUN"}]));
    assert_eq!(session.current().api_url, "https://api-east.example/");

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    let preflight = &sent[0];
    assert_eq!(preflight.header(HEADER_ENCRYPTED), Some("1"));
    assert_eq!(preflight.header("x-route-version"), Some("1"));
    let (_, payload) = DevEnvelopeCodec
        .open_request(preflight.body.as_ref().unwrap())
        .unwrap();
    assert_eq!(payload["apiUrl"], API);
    assert_eq!(payload["projectId"], "abc123");
    assert_eq!(payload["ciBuildId"], "build-7");

    let runs = &sent[1];
    assert_eq!(runs.url, "https://api-east.example/runs");
    assert_eq!(runs.header("x-route-version"), Some("4"));
    assert_eq!(runs.header("x-cypress-request-attempt"), Some("0"));
    assert_eq!(runs.header(HEADER_ENCRYPTED), Some("1"));
    assert!(runs.header("x-cypress-version").is_some());
    assert!(runs.header("x-os-name").is_some());
    assert_eq!(runs.timeout, Duration::from_secs(60));
    let (_, body) = DevEnvelopeCodec
        .open_request(runs.body.as_ref().unwrap())
        .unwrap();
    assert_eq!(body["runnerCapabilities"]["skipSpecAction"], true);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn create_run_without_encryption_sends_plain_body() {
    let transport = ScriptedTransport::new()
        .on(
            "api-proxy.example/preflight",
            Reply::Sealed(200, json!({"encrypt": false, "apiUrl": API})),
        )
        .on("api.example/runs", Reply::Json(200, json!({"runId": "run-2"})));
    let api = client(&transport, &RecordingSleeper::default());
    let session = api.new_session();

    let run = api
        .create_run(
            &session,
            &CreateRunOptions {
                project_id: "abc123".into(),
                timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(run.get("warnings").is_none());
    let runs = &transport.sent_to("/runs")[0];
    assert!(runs.header(HEADER_ENCRYPTED).is_none());
    assert_eq!(runs.body.as_ref().unwrap()["projectId"], "abc123");
    assert_eq!(runs.timeout, Duration::from_secs(5));
}

#[tokio::test]
async fn failed_negotiation_fails_create_run() {
    let transport = ScriptedTransport::new()
        .on("api-proxy.example/preflight", Reply::Fail(ApiError::transport("refused")))
        .on("api.example/preflight", Reply::Sealed(422, json!({"code": "BAD_PROJECT"})));
    let api = client(&transport, &RecordingSleeper::default());
    let session = api.new_session();

    let err = api
        .create_run(
            &session,
            &CreateRunOptions {
                project_id: "abc123".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_api_error());
    assert_eq!(err.status_code(), Some(422));
    assert!(transport.sent_to("/runs").is_empty());
    assert_eq!(session.current(), PreflightSession::initial(API));
}

#[tokio::test]
async fn negotiation_is_scoped_to_its_session() {
    let transport = ScriptedTransport::new()
        .on(
            "api-proxy.example/preflight",
            Reply::Sealed(200, json!({"encrypt": false, "apiUrl": "https://api-east.example/"})),
        )
        .on("api-east.example/runs", Reply::Json(200, json!({"runId": "run-a"})))
        .on(
            "//api.example/runs/run-b/instances",
            Reply::Sealed(200, json!({"instanceId": "inst-b"})),
        );
    let api = client(&transport, &RecordingSleeper::default());
    let a = api.new_session();
    let b = api.new_session();

    api.create_run(
        &a,
        &CreateRunOptions {
            project_id: "abc123".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(
        a.current(),
        PreflightSession {
            encrypt: false,
            api_url: "https://api-east.example/".into(),
        }
    );
    assert_eq!(b.current(), PreflightSession::initial(API));

    let instance = api
        .create_instance(
            &b,
            &CreateInstanceOptions {
                run_id: "run-b".into(),
                group_id: "default".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(instance["instanceId"], "inst-b");

    let request = &transport.sent_to("/instances")[0];
    assert_eq!(request.url, "https://api.example/runs/run-b/instances");
    assert_eq!(request.header(HEADER_ENCRYPTED), Some("1"));
}

#[test]
fn client_requires_an_envelope_codec() {
    let result = runrecord::CloudApi::builder(ApiConfig::default().with_api_url(API))
        .transport(ScriptedTransport::new())
        .build();
    assert!(matches!(result, Err(Error::MissingCodec)));
}

#[tokio::test]
async fn three_unavailable_responses_then_success() {
    let transport = ScriptedTransport::new()
        .on("/runs/run-1/instances", Reply::Json(503, json!(null)))
        .on("/runs/run-1/instances", Reply::Json(503, json!(null)))
        .on("/runs/run-1/instances", Reply::Json(503, json!(null)))
        .on("/runs/run-1/instances", Reply::Json(200, json!({"instanceId": "inst-1"})));
    let sleeper = RecordingSleeper::default();
    let api = client(&transport, &sleeper);
    let session = plain_session(&api);

    let instance = api
        .create_instance(
            &session,
            &CreateInstanceOptions {
                run_id: "run-1".into(),
                group_id: "linux-chrome".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(instance["instanceId"], "inst-1");
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120)
        ]
    );
    let attempts: Vec<_> = transport
        .sent()
        .iter()
        .map(|r| r.header("x-cypress-request-attempt").map(str::to_string))
        .collect();
    assert_eq!(
        attempts,
        vec![
            Some("0".into()),
            Some("1".into()),
            Some("2".into()),
            Some("3".into())
        ]
    );
    let last = transport.sent().pop().unwrap();
    assert_eq!(last.header("x-route-version"), Some("5"));
    assert_eq!(last.header("x-cypress-run-id"), Some("run-1"));
    assert_eq!(last.body.unwrap()["groupId"], "linux-chrome");
}

#[tokio::test]
async fn not_found_is_surfaced_without_delay() {
    let transport = ScriptedTransport::new().on(
        "/instances/inst-1/tests",
        Reply::Json(404, json!({"code": "INSTANCE_NOT_FOUND"})),
    );
    let sleeper = RecordingSleeper::default();
    let api = client(&transport, &sleeper);
    let session = plain_session(&api);

    let err = api
        .post_instance_tests(
            &session,
            &InstanceTestsOptions {
                instance_id: "inst-1".into(),
                run_id: "run-1".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_api_error());
    assert_eq!(err.status_code(), Some(404));
    assert!(err.to_string().starts_with("404\n\n{"));
    assert_eq!(transport.sent().len(), 1);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn unreadable_encrypted_response_is_final() {
    let foreign = DevEnvelopeCodec.seal_with(&json!({"ok": true}), &SessionKey::generate());
    let transport = ScriptedTransport::new()
        .on("/instances/inst-1/results", Reply::Json(503, json!(null)))
        .on(
            "/instances/inst-1/results",
            Reply::Raw(WireResponse::json(200, &foreign).with_header(HEADER_ENCRYPTED, "1")),
        );
    let sleeper = RecordingSleeper::default();
    let api = client(&transport, &sleeper);
    let session = api.new_session();

    let err = api
        .post_instance_results(
            &session,
            &InstanceResultsOptions {
                instance_id: "inst-1".into(),
                run_id: "run-1".into(),
                stats: Some(json!({"passes": 3})),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(err.api_error().is_some_and(ApiError::is_decryption));
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(sleeper.delays(), vec![Duration::from_secs(30)]);
}

#[tokio::test]
async fn stdout_is_never_encrypted() {
    let transport = ScriptedTransport::new()
        .on("/instances/inst-1/stdout", Reply::Json(200, json!({})));
    let api = client(&transport, &RecordingSleeper::default());
    let session = api.new_session();
    assert!(session.current().encrypt);

    api.update_instance_stdout(
        &session,
        &InstanceStdoutOptions {
            instance_id: "inst-1".into(),
            run_id: "run-1".into(),
            stdout: "3 passing".into(),
            timeout: None,
        },
    )
    .await
    .unwrap();

    let request = &transport.sent()[0];
    assert_eq!(request.method, reqwest::Method::PUT);
    assert!(request.header(HEADER_ENCRYPTED).is_none());
    assert!(request.header("x-route-version").is_none());
    assert_eq!(request.header("x-cypress-run-id"), Some("run-1"));
    assert_eq!(request.body, Some(json!({"stdout": "3 passing"})));
}

#[tokio::test]
async fn disabled_retries_make_one_attempt() {
    let transport = ScriptedTransport::new()
        .on("/runs/run-1/instances", Reply::Json(503, json!(null)))
        .on("/runs/run-1/instances", Reply::Json(200, json!({})));
    let sleeper = RecordingSleeper::default();
    let api = client_with(
        ApiConfig::default()
            .with_api_url(API)
            .with_retries_disabled(true),
        &transport,
        &sleeper,
    );
    let session = plain_session(&api);

    let err = api
        .create_instance(
            &session,
            &CreateInstanceOptions {
                run_id: "run-1".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(503));
    assert_eq!(transport.sent().len(), 1);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn crash_report_uses_bearer_and_short_timeout() {
    let transport =
        ScriptedTransport::new().on("/exceptions", Reply::Json(503, json!(null)));
    let sleeper = RecordingSleeper::default();
    let api = client(&transport, &sleeper);

    let err = api
        .create_crash_report(&json!({"message": "boom"}), "token-1", None)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(503));
    let request = &transport.sent()[0];
    assert_eq!(request.bearer.as_deref(), Some("token-1"));
    assert_eq!(request.timeout, Duration::from_secs(3));
    assert_eq!(transport.sent().len(), 1);
    assert!(sleeper.delays().is_empty());
}

fn logout_urls() -> Reply {
    Reply::Json(
        200,
        json!({
            "dashboardAuthUrl": "https://cloud.example/login",
            "dashboardLogoutUrl": "https://cloud.example/logout",
        }),
    )
}

#[tokio::test]
async fn log_out_treats_unauthorized_as_success() {
    let transport = ScriptedTransport::new()
        .on("/auth", logout_urls())
        .on("cloud.example/logout", Reply::Json(401, json!({"code": "UNAUTHORIZED"})));
    let api = client(&transport, &RecordingSleeper::default());

    api.log_out("token-1").await.unwrap();

    let request = &transport.sent_to("/logout")[0];
    assert_eq!(request.bearer.as_deref(), Some("token-1"));
    assert_eq!(request.header("x-machine-id"), Some("machine-1"));
}

#[tokio::test]
async fn log_out_surfaces_server_errors_after_retries() {
    let mut transport = ScriptedTransport::new().on("/auth", logout_urls());
    for _ in 0..4 {
        transport = transport.on(
            "cloud.example/logout",
            Reply::Json(500, json!({"code": "OOPS"})),
        );
    }
    let sleeper = RecordingSleeper::default();
    let api = client(&transport, &sleeper);

    let err = api.log_out("token-1").await.unwrap_err();
    assert!(err.is_api_error());
    assert_eq!(err.status_code(), Some(500));
    assert_eq!(transport.sent_to("/logout").len(), 4);
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120)
        ]
    );
}

#[tokio::test]
async fn log_out_recovers_from_transient_server_error() {
    let transport = ScriptedTransport::new()
        .on("/auth", logout_urls())
        .on("cloud.example/logout", Reply::Json(500, json!({"code": "OOPS"})))
        .on("cloud.example/logout", Reply::Json(200, json!({})));
    let sleeper = RecordingSleeper::default();
    let api = client(&transport, &sleeper);

    api.log_out("token-1").await.unwrap();

    let sent = transport.sent_to("/logout");
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|r| r.bearer.as_deref() == Some("token-1")));
    assert_eq!(sent[1].header("x-machine-id"), Some("machine-1"));
    assert_eq!(sleeper.delays(), vec![Duration::from_secs(30)]);
}

#[tokio::test]
async fn log_out_without_logout_url_is_local_error() {
    let transport = ScriptedTransport::new()
        .on("/auth", Reply::Json(200, json!({"dashboardAuthUrl": "https://x/login"})));
    let api = client(&transport, &RecordingSleeper::default());

    let err = api.log_out("token-1").await.unwrap_err();
    assert!(matches!(err, Error::MissingField("dashboardLogoutUrl")));
    assert!(!err.is_api_error());
}

#[tokio::test]
async fn ping_failures_are_tagged() {
    let transport = ScriptedTransport::new()
        .on("/ping", Reply::Json(200, json!(null)))
        .on("/ping", Reply::Fail(ApiError::transport("connection reset")));
    let api = client(&transport, &RecordingSleeper::default());

    api.ping().await.unwrap();
    let err = api.ping().await.unwrap_err();
    assert!(err.is_api_error());
    assert_eq!(err.to_string(), "request failed: connection reset");
}
