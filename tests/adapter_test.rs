use exchangenet::base::exchangestate::ExchangeState;
use exchangenet::base::neterror::NetError;
use exchangenet::connector::{Adapter, ConnectorConfig, Pipeline};
use exchangenet::exchange::mock::MockExchange;
use exchangenet::exchange::Exchange;
use exchangenet::http::{RequestFacade, ResponseFacade};
use exchangenet::mapping::{Context, Host, StaticMapper, Target};
use exchangenet::session::{InMemorySessionStore, Session, SessionStore};
use http::{Method, StatusCode};
use std::cell::RefCell;
use std::io::ErrorKind;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

type Seen = Arc<Mutex<Vec<String>>>;

fn mapper(store: Arc<InMemorySessionStore>) -> StaticMapper {
    let app = Context::new("/app", store.clone())
        .with_target(Target::new("page", "/page"))
        .with_target(Target::new("form", "/form").with_methods([Method::GET, Method::POST]))
        .with_target(Target::new("default", "/"));
    StaticMapper::new().with_host(Host::new("localhost").with_context(app))
}

fn adapter_with(config: ConnectorConfig, pipeline: impl Pipeline + 'static) -> (Adapter, Arc<InMemorySessionStore>) {
    let store = Arc::new(InMemorySessionStore::new());
    let adapter = Adapter::new(config, Arc::new(mapper(store.clone())), Arc::new(pipeline)).unwrap();
    (adapter, store)
}

fn adapter(pipeline: impl Pipeline + 'static) -> (Adapter, Arc<InMemorySessionStore>) {
    adapter_with(ConnectorConfig::default(), pipeline)
}

fn handler<F>(f: F) -> F
where
    F: Fn(&RequestFacade, &ResponseFacade) -> Result<(), NetError> + Send + Sync + 'static,
{
    f
}

fn ok_pipeline() -> impl Pipeline {
    handler(|_, _| Ok(()))
}

#[test]
fn test_url_session_id_is_stripped() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, _) = adapter(handler(move |req, _| {
        let mut seen = record.lock().unwrap();
        seen.push(req.requested_session_id()?.unwrap_or_default());
        seen.push(req.is_requested_session_id_from_url()?.to_string());
        seen.push(req.request_uri()?);
        seen.push(req.servlet_path()?);
        seen.push(req.query_string()?.unwrap_or_default());
        seen.push(req.parameter("x")?.unwrap_or_default());
        Ok(())
    }));

    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page;jsessionid=ABC123?x=1").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["ABC123", "true", "/app/page", "/page", "x=1", "1"]
    );
    assert_eq!(exchange.borrow().status(), StatusCode::OK);
}

#[test]
fn test_cookie_overrides_url_session_id() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, store) = adapter(handler(move |req, _| {
        let mut seen = record.lock().unwrap();
        seen.push(req.requested_session_id()?.unwrap_or_default());
        seen.push(req.is_requested_session_id_from_cookie()?.to_string());
        seen.push(req.is_requested_session_id_valid()?.to_string());
        Ok(())
    }));
    store.insert(Session::new("COOKIE1"));

    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page;jsessionid=URL1")
        .with_header("cookie", "theme=dark; JSESSIONID=COOKIE1")
        .into_ref();
    adapter.service(&mut slot, exchange).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["COOKIE1", "true", "true"]);
}

#[test]
fn test_duplicate_session_cookie_keeps_valid_id() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, store) = adapter(handler(move |req, _| {
        record.lock().unwrap().push(req.requested_session_id()?.unwrap_or_default());
        Ok(())
    }));
    store.insert(Session::new("LIVE"));

    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page")
        .with_header("cookie", "JSESSIONID=LIVE; JSESSIONID=STALE")
        .into_ref();
    adapter.service(&mut slot, exchange).unwrap();

    let exchange = MockExchange::get("/app/page")
        .with_header("cookie", "JSESSIONID=STALE; JSESSIONID=LIVE")
        .into_ref();
    adapter.service(&mut slot, exchange).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["LIVE", "LIVE"]);
}

#[test]
fn test_traversal_is_rejected_without_dispatch() {
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let (adapter, _) = adapter(handler(move |_, _| {
        *counter.lock().unwrap() += 1;
        Ok(())
    }));

    let mut slot = adapter.new_slot();
    for target in ["/app/../../etc/passwd", "/app/%2e%2e/%2e%2e/x", "/app/%zz", "/app/a%2Fb"] {
        let exchange = MockExchange::get(target).into_ref();
        adapter.service(&mut slot, exchange.clone()).unwrap();
        let exchange = exchange.borrow();
        assert_eq!(exchange.status(), StatusCode::BAD_REQUEST, "target {target}");
        assert!(exchange.is_finished());
    }
    assert_eq!(*calls.lock().unwrap(), 0);
    assert!(!slot.is_bound());
}

#[test]
fn test_dot_segments_are_normalized_before_mapping() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, _) = adapter(handler(move |req, _| {
        record.lock().unwrap().push(req.servlet_path()?);
        Ok(())
    }));

    let mut slot = adapter.new_slot();
    adapter
        .service(&mut slot, MockExchange::get("/app/x/../page").into_ref())
        .unwrap();
    adapter
        .service(&mut slot, MockExchange::get("/app/./%70age").into_ref())
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["/page", "/page"]);
}

#[test]
fn test_options_asterisk() {
    let (adapter, _) = adapter(ok_pipeline());
    let mut slot = adapter.new_slot();

    let exchange = MockExchange::new(Method::OPTIONS, "*").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::OK);
    assert_eq!(
        exchange.borrow().response_header("allow").as_deref(),
        Some("GET, HEAD, POST, PUT, DELETE, OPTIONS")
    );

    let exchange = MockExchange::new(Method::GET, "*").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_method_not_allowed_lists_allowed_methods() {
    let (adapter, _) = adapter(ok_pipeline());
    let mut slot = adapter.new_slot();

    let exchange = MockExchange::new(Method::PUT, "/app/form").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(exchange.borrow().response_header("allow").as_deref(), Some("GET, POST"));
}

#[test]
fn test_trace_rejected_unless_allowed() {
    let (adapter, _) = adapter(ok_pipeline());
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::new(Method::TRACE, "/app/page").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        exchange.borrow().response_header("allow").as_deref(),
        Some("GET, HEAD, POST, PUT, DELETE, OPTIONS")
    );

    let config = ConnectorConfig {
        allow_trace: true,
        ..ConnectorConfig::default()
    };
    let (adapter, _) = adapter_with(config, ok_pipeline());
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::new(Method::TRACE, "/app/page").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::OK);
}

#[test]
fn test_context_root_redirects_with_slash() {
    let (adapter, _) = adapter(ok_pipeline());
    let mut slot = adapter.new_slot();

    let exchange = MockExchange::get("/app;jsessionid=S1?x=1").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    let exchange = exchange.borrow();
    assert_eq!(exchange.status(), StatusCode::FOUND);
    assert_eq!(
        exchange.response_header("location").as_deref(),
        Some("http://localhost/app/;jsessionid=S1?x=1")
    );
}

#[test]
fn test_unmapped_path_is_404() {
    let (adapter, _) = adapter(ok_pipeline());
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/other").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::NOT_FOUND);
    assert!(exchange.borrow().is_finished());
}

#[test]
fn test_body_is_completed_with_length() {
    let (adapter, _) = adapter(handler(|_, res| {
        res.set_content_type(Some("text/plain"))?;
        res.write_str("hello")
    }));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();

    let exchange = exchange.borrow();
    assert_eq!(exchange.written_text(), "hello");
    let headers = exchange.committed_headers().unwrap();
    assert_eq!(headers["content-length"], "5");
    assert_eq!(headers["content-type"], "text/plain;charset=ISO-8859-1");
}

#[test]
fn test_handler_error_becomes_status() {
    let (adapter, _) = adapter(handler(|_, res| {
        res.write_str("partial")?;
        Err(NetError::handler("boom"))
    }));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page").into_ref();

    let err = adapter.service(&mut slot, exchange.clone()).unwrap_err();
    assert_eq!(err, NetError::handler("boom"));
    assert_eq!(exchange.borrow().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(exchange.borrow().written_text(), "");
    assert_eq!(slot.state(), ExchangeState::New);
    assert_eq!(slot.served(), 1);
}

#[test]
fn test_client_abort_is_reported_not_panicked() {
    let (adapter, _) = adapter(handler(|_, res| {
        res.write_bytes(b"data")?;
        res.flush_buffer()
    }));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page")
        .fail_writes_with(ErrorKind::BrokenPipe)
        .into_ref();

    let err = adapter.service(&mut slot, exchange.clone()).unwrap_err();
    assert!(err.is_client_abort());
    assert!(exchange.borrow().is_finished());
    assert!(!slot.is_bound());
}

#[test]
fn test_client_abort_at_completion_is_swallowed() {
    let (adapter, _) = adapter(handler(|_, res| res.write_str("buffered")));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page")
        .fail_writes_with(ErrorKind::ConnectionReset)
        .into_ref();

    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert!(exchange.borrow().is_finished());
    assert_eq!(slot.served(), 1);
}

#[test]
fn test_panicking_handler_still_recycles() {
    let (adapter, _) = adapter(handler(|_, _| {
        panic!("handler bug")
    }));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page").into_ref();

    let result = catch_unwind(AssertUnwindSafe(|| adapter.service(&mut slot, exchange.clone())));
    assert!(result.is_err());
    assert!(exchange.borrow().is_finished());
    assert!(!slot.is_bound());
    assert_eq!(slot.served(), 1);
}

thread_local! {
    static KEPT: RefCell<Option<(RequestFacade, ResponseFacade)>> = const { RefCell::new(None) };
}

#[test]
fn test_facades_fail_after_recycle() {
    let (adapter, _) = adapter(handler(|req, res| {
        KEPT.with(|k| *k.borrow_mut() = Some((req.clone(), res.clone())));
        Ok(())
    }));
    let mut slot = adapter.new_slot();
    adapter
        .service(&mut slot, MockExchange::get("/app/page").into_ref())
        .unwrap();

    let (req, res) = KEPT.with(|k| k.borrow_mut().take()).unwrap();
    assert!(!req.is_live());
    assert_eq!(req.method(), Err(NetError::FacadeRecycled));
    assert_eq!(res.write_str("late"), Err(NetError::FacadeRecycled));

    // The slot is reused: old facades must not reach the new exchange.
    slot.bind(MockExchange::get("/app/page").into_ref());
    assert_eq!(req.request_uri(), Err(NetError::FacadeRecycled));
    slot.recycle();
}

#[test]
fn test_new_session_sets_cookie() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, store) = adapter(handler(move |req, _| {
        let session = req.session(true)?.ok_or_else(|| NetError::handler("no session"))?;
        record.lock().unwrap().push(session.id().to_string());
        Ok(())
    }));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();

    let id = seen.lock().unwrap()[0].clone();
    assert!(store.find(&id).is_some());
    let cookie = exchange.borrow().response_header("set-cookie").unwrap();
    assert!(cookie.starts_with(&format!("JSESSIONID={id}")), "{cookie}");
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Path=/app"));
}

#[test]
fn test_encode_url_rewrites_for_url_sessions() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, store) = adapter(handler(move |_, res| {
        let mut seen = record.lock().unwrap();
        seen.push(res.encode_url("/app/next?a=b")?);
        seen.push(res.encode_url("http://elsewhere.example/x")?);
        Ok(())
    }));
    store.insert(Session::new("S1"));

    let mut slot = adapter.new_slot();
    adapter
        .service(&mut slot, MockExchange::get("/app/page;jsessionid=S1").into_ref())
        .unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["/app/next;jsessionid=S1?a=b", "http://elsewhere.example/x"]
    );
}

#[test]
fn test_form_post_parameters() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, _) = adapter(handler(move |req, _| {
        let mut seen = record.lock().unwrap();
        seen.push(req.parameter("a")?.unwrap_or_default());
        seen.push(req.parameter("b")?.unwrap_or_default());
        seen.push(req.parameter_values("q")?.join(","));
        Ok(())
    }));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::post_form("/app/form?q=1", "a=1&b=two+words&q=2").into_ref();
    adapter.service(&mut slot, exchange).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["1", "two words", "1,2"]);
}

#[test]
fn test_oversized_form_is_413() {
    let config = ConnectorConfig {
        max_post_size: Some(4),
        ..ConnectorConfig::default()
    };
    let (adapter, _) = adapter_with(config, handler(|req, _| req.parameter("a").map(|_| ())));
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::post_form("/app/form", "a=123456789").into_ref();

    let err = adapter.service(&mut slot, exchange.clone()).unwrap_err();
    assert_eq!(err, NetError::PostTooLarge { limit: 4 });
    assert_eq!(exchange.borrow().status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[test]
fn test_slot_reuse_starts_clean() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, _) = adapter(handler(move |req, _| {
        let mut seen = record.lock().unwrap();
        seen.push(format!(
            "attrs={} params={} cookies={}",
            req.attribute_names()?.len(),
            req.parameter_names()?.len(),
            req.cookies()?.len()
        ));
        req.set_attribute("marker", Arc::new(1u8))?;
        Ok(())
    }));
    let mut pool = adapter.new_pool();
    let id = pool.acquire();

    let first = MockExchange::get("/app/page?a=1&b=2")
        .with_header("cookie", "k=v")
        .into_ref();
    adapter.service(pool.get_mut(id).unwrap(), first).unwrap();
    pool.release(id);

    let id = pool.acquire();
    adapter
        .service(pool.get_mut(id).unwrap(), MockExchange::get("/app/page").into_ref())
        .unwrap();
    pool.release(id);

    assert_eq!(pool.capacity(), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["attrs=0 params=2 cookies=1", "attrs=0 params=0 cookies=0"]
    );
}

#[test]
fn test_connection_info() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let pipeline = handler(move |req, _| {
        record.lock().unwrap().push(format!(
            "{} {} {} {}",
            req.scheme()?,
            req.is_secure()?,
            req.server_name()?,
            req.server_port()?
        ));
        Ok(())
    });
    let (adapter, _) = adapter(pipeline.clone());
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page")
        .with_scheme("https")
        .with_host("shop.example:8443")
        .into_ref();
    adapter.service(&mut slot, exchange).unwrap();

    let config = ConnectorConfig {
        proxy_name: Some("proxy.example".into()),
        proxy_port: Some(443),
        ..ConnectorConfig::default()
    };
    let (adapter, _) = adapter_with(config, pipeline);
    let mut slot = adapter.new_slot();
    adapter
        .service(&mut slot, MockExchange::get("/app/page").into_ref())
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["https true shop.example 8443", "http false proxy.example 443"]
    );
}

#[test]
fn test_x_powered_by() {
    let config = ConnectorConfig {
        x_powered_by: Some("exchangenet".into()),
        ..ConnectorConfig::default()
    };
    let (adapter, _) = adapter_with(config, ok_pipeline());
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(
        exchange.borrow().response_header("x-powered-by").as_deref(),
        Some("exchangenet")
    );
}

fn files_adapter(config: ConnectorConfig, pipeline: impl Pipeline + 'static) -> Adapter {
    let store = Arc::new(InMemorySessionStore::new());
    let app = Context::new("/app", store).with_target(Target::new("files", "/files/*"));
    let mapper = StaticMapper::new().with_host(Host::new("localhost").with_context(app));
    Adapter::new(config, Arc::new(mapper), Arc::new(pipeline)).unwrap()
}

#[test]
fn test_path_parameters_cannot_hide_dot_segments() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let adapter = files_adapter(
        ConnectorConfig::default(),
        handler(move |req, _| {
            record.lock().unwrap().push(format!(
                "{} {} {:?} {:?}",
                req.context_path()?,
                req.servlet_path()?,
                req.path_info()?,
                req.path_parameter("v")?
            ));
            Ok(())
        }),
    );
    let mut slot = adapter.new_slot();

    let exchange = MockExchange::get("/app/files/..;x=1/..;y=2/etc/passwd").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::NOT_FOUND);

    let exchange = MockExchange::get("/app/files/a/..;v=1/b").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::OK);

    let exchange = MockExchange::get("/app/files/..;x=1/..;y=2/..;z=3/x").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::BAD_REQUEST);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![r#"/app /files Some("/b") Some("1")"#]
    );
}

#[test]
fn test_session_id_among_other_path_parameters() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let (adapter, _) = adapter(handler(move |req, _| {
        let mut seen = record.lock().unwrap();
        seen.push(req.requested_session_id()?.unwrap_or_default());
        seen.push(req.request_uri()?);
        seen.push(req.servlet_path()?);
        seen.push(req.path_parameter("lang")?.unwrap_or_default());
        Ok(())
    }));

    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/page;jsessionid=S9;lang=en").into_ref();
    adapter.service(&mut slot, exchange).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["S9", "/app/page;lang=en", "/page", "en"]
    );
}

#[test]
fn test_proxy_name_selects_mapped_host() {
    let seen: Seen = Arc::default();
    let record = seen.clone();
    let pipeline = handler(move |req, _| {
        record
            .lock()
            .unwrap()
            .push(format!("{} {}", req.server_name()?, req.context_path()?));
        Ok(())
    });
    let build = |config: ConnectorConfig| {
        let store: Arc<InMemorySessionStore> = Arc::new(InMemorySessionStore::new());
        let mapper = StaticMapper::new()
            .with_host(Host::new("internal").with_context(Context::new("/other", store.clone())))
            .with_host(
                Host::new("proxy.example")
                    .with_context(Context::new("/app", store).with_target(Target::new("default", "/"))),
            );
        Adapter::new(config, Arc::new(mapper), Arc::new(pipeline.clone())).unwrap()
    };

    let adapter = build(ConnectorConfig {
        proxy_name: Some("proxy.example".into()),
        ..ConnectorConfig::default()
    });
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/x").with_host("internal").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::OK);

    let adapter = build(ConnectorConfig::default());
    let mut slot = adapter.new_slot();
    let exchange = MockExchange::get("/app/x").with_host("internal").into_ref();
    adapter.service(&mut slot, exchange.clone()).unwrap();
    assert_eq!(exchange.borrow().status(), StatusCode::NOT_FOUND);

    assert_eq!(*seen.lock().unwrap(), vec!["proxy.example /app"]);
}

#[test]
fn test_client_charset_names_do_not_grow_cache() {
    let (adapter, _) = adapter(handler(|req, _| {
        req.parameter("a")?;
        Ok(())
    }));
    let mut slot = adapter.new_slot();
    let post = |charset: &str| {
        MockExchange::new(Method::POST, "/app/form")
            .with_header(
                "content-type",
                &format!("application/x-www-form-urlencoded; charset={charset}"),
            )
            .with_body_chunks(["a=1"])
            .into_ref()
    };

    adapter.service(&mut slot, post("UTF-8")).unwrap();
    adapter.service(&mut slot, post("x-warm")).unwrap();
    let warm = adapter.charsets().len();
    for i in 0..200 {
        adapter.service(&mut slot, post(&format!("x-junk-{i}"))).unwrap();
    }
    assert_eq!(adapter.charsets().len(), warm);
}
