use ensemble::AppError;

#[test]
fn display_prefixes_each_kind() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Rejected("busy".into()), "rejected: busy"),
        (AppError::NotFound("client x".into()), "not found: client x"),
        (AppError::Document("no root".into()), "document: no root"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Store("closed".into()), "store: closed"),
        (AppError::Launch("spawn".into()), "launch: spawn"),
        (AppError::Delivery("gone".into()), "delivery: gone"),
        (AppError::Ipc("pipe".into()), "ipc: pipe"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_error_converts_to_io() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("denied")));
}

#[test]
fn toml_error_converts_to_config() {
    let parse: Result<toml::Value, _> = toml::from_str("= nope");
    let err = AppError::from(parse.expect_err("invalid toml"));
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error + Send + 'static>(_: &E) {}
    assert_error(&AppError::Rejected("x".into()));
}
