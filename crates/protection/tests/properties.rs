use data_protection::{
    CryptoError, DataProtectionProvider, DataProtector, Operation, PasswordProtector,
    Protectable, ProtectionError, Protector, ProtectorExt,
};

fn protector() -> DataProtector {
    DataProtectionProvider::ephemeral()
        .unwrap()
        .create_protector("integration-tests")
        .unwrap()
}

#[derive(Debug, Clone, Default, Protectable)]
struct Scenario {
    a: String,
    #[protect]
    b: String,
    #[protect(optional)]
    c: String,
}

#[derive(Debug, Clone, Default, Protectable)]
struct Credentials {
    user: String,
    #[protect]
    password: Option<String>,
}

#[derive(Debug, Clone, Default, Protectable)]
struct Database {
    host: String,
    #[protect(nested)]
    credentials: Credentials,
}

#[derive(Debug, Clone, Default, Protectable)]
struct Smtp {
    #[protect]
    password: String,
}

#[derive(Debug, Clone, Default, Protectable)]
struct AppSettings {
    name: String,
    #[protect]
    api_key: String,
    #[protect(nested)]
    primary: Box<Database>,
    #[protect(nested)]
    replica: Option<Database>,
    #[protect(nested)]
    smtp: Option<Box<Smtp>>,
}

#[derive(Debug, Clone, Default, Protectable)]
struct Envelope<T: Protectable> {
    #[protect(nested)]
    body: T,
    #[protect]
    signature: String,
}

fn settings() -> AppSettings {
    AppSettings {
        name: "billing".into(),
        api_key: "key-123".into(),
        primary: Box::new(Database {
            host: "db-1".into(),
            credentials: Credentials {
                user: "admin".into(),
                password: Some("pw-primary".into()),
            },
        }),
        replica: Some(Database {
            host: "db-2".into(),
            credentials: Credentials {
                user: "reader".into(),
                password: Some("pw-replica".into()),
            },
        }),
        smtp: Some(Box::new(Smtp {
            password: "pw-smtp".into(),
        })),
    }
}

#[test]
fn scenario_a_b_c() {
    let p = protector();
    let mut obj = Scenario {
        a: "secret1".into(),
        b: "secret2".into(),
        c: "secret3".into(),
    };

    p.protect_properties(&mut obj).unwrap();
    assert_eq!(obj.a, "secret1");
    assert_ne!(obj.b, "secret2");
    assert_ne!(obj.c, "secret3");
    assert_ne!(obj.b, obj.c);

    p.unprotect_properties(&mut obj).unwrap();
    assert_eq!(obj.a, "secret1");
    assert_eq!(obj.b, "secret2");
    assert_eq!(obj.c, "secret3");

    // B is mandatory, so it has to hold protected data again before the
    // plain-text C can be tolerated.
    p.protect_properties(&mut obj).unwrap();
    obj.c = "plain text secret".into();
    p.unprotect_properties(&mut obj).unwrap();
    assert_eq!(obj.b, "secret2");
    assert_eq!(obj.c, "plain text secret");
}

#[test]
fn deep_graph_round_trip() {
    let p = protector();
    let original = settings();
    let mut s = original.clone();

    p.protect_properties(&mut s).unwrap();
    assert_eq!(s.name, "billing");
    assert_eq!(s.primary.host, "db-1");
    assert_eq!(s.primary.credentials.user, "admin");
    assert_ne!(s.api_key, original.api_key);
    assert_ne!(s.primary.credentials.password, original.primary.credentials.password);
    assert_ne!(
        s.replica.as_ref().unwrap().credentials.password,
        original.replica.as_ref().unwrap().credentials.password
    );
    assert_ne!(s.smtp.as_ref().unwrap().password, "pw-smtp");

    p.unprotect_properties(&mut s).unwrap();
    assert_eq!(s.api_key, "key-123");
    assert_eq!(s.primary.credentials.password.as_deref(), Some("pw-primary"));
    assert_eq!(
        s.replica.as_ref().unwrap().credentials.password.as_deref(),
        Some("pw-replica")
    );
    assert_eq!(s.smtp.as_ref().unwrap().password, "pw-smtp");
}

#[test]
fn siblings_are_processed_independently() {
    let p = protector();
    let mut s = settings();
    s.replica = None;

    p.protect_properties(&mut s).unwrap();
    assert!(s.replica.is_none());
    p.unprotect_properties(&mut s).unwrap();
    assert_eq!(s.primary.credentials.password.as_deref(), Some("pw-primary"));
    assert_eq!(s.smtp.as_ref().unwrap().password, "pw-smtp");
}

#[test]
fn empty_and_absent_values_are_left_alone() {
    let p = protector();
    let mut s = AppSettings::default();
    p.protect_properties(&mut s).unwrap();
    assert!(s.api_key.is_empty());
    assert!(s.primary.credentials.password.is_none());
    p.unprotect_properties(&mut s).unwrap();
    assert!(s.api_key.is_empty());
}

#[test]
fn mandatory_plain_text_deep_in_graph_is_reported_with_path() {
    let p = protector();
    let mut s = settings();
    p.protect_properties(&mut s).unwrap();
    s.replica.as_mut().unwrap().credentials.password = Some("not protected".into());

    let err = p.unprotect_properties(&mut s).unwrap_err();
    assert_eq!(err.operation, Operation::Unprotect);
    assert_eq!(err.containing_type, "AppSettings");
    assert_eq!(err.field, "replica");
    assert_eq!(err.path(), "replica.credentials.password");
    assert!(matches!(err.crypto_error(), Some(CryptoError::InvalidPayload)));
}

#[test]
fn optional_field_keeps_protected_value_from_other_key_ring_failure() {
    let mut obj = Scenario {
        c: "secret3".into(),
        ..Default::default()
    };
    protector().protect_properties(&mut obj).unwrap();

    // Protected by a different key ring: the key id is unknown here, which is
    // not a payload failure, so even the optional field reports it.
    let err = protector().unprotect_properties(&mut obj).unwrap_err();
    assert_eq!(err.field, "c");
    assert!(matches!(err.crypto_error(), Some(CryptoError::KeyNotFound(_))));
}

#[test]
fn generic_wrapper_reaches_inner_fields() {
    let p = protector();
    let mut envelope = Envelope {
        body: Smtp {
            password: "pw".into(),
        },
        signature: "sig".into(),
    };
    p.protect_properties(&mut envelope).unwrap();
    assert_ne!(envelope.body.password, "pw");
    assert_eq!(envelope.type_name(), "Envelope");
    p.unprotect_properties(&mut envelope).unwrap();
    assert_eq!(envelope.body.password, "pw");
    assert_eq!(envelope.signature, "sig");
}

#[test]
fn calls_chain_through_the_returned_protector() {
    let p = protector();
    let mut s = settings();
    p.protect_properties(&mut s)
        .unwrap()
        .unprotect_properties(&mut s)
        .unwrap();
    assert_eq!(s.api_key, "key-123");
}

#[test]
fn walker_works_through_a_trait_object() {
    let p: Box<dyn Protector> = protector().derive("settings").unwrap();
    let mut s = settings();
    p.protect_properties(&mut s).unwrap();
    p.unprotect_properties(&mut s).unwrap();
    assert_eq!(s.api_key, "key-123");
}

#[test]
fn password_protector_drives_the_walker() {
    let p = PasswordProtector::new("correct horse", b"0123456789abcdef").unwrap();
    let mut s = settings();
    p.protect_properties(&mut s).unwrap();
    p.unprotect_properties(&mut s).unwrap();
    assert_eq!(s.smtp.as_ref().unwrap().password, "pw-smtp");

    let wrong = PasswordProtector::new("wrong horse", b"0123456789abcdef").unwrap();
    p.protect_properties(&mut s).unwrap();
    let err = wrong.unprotect_properties(&mut s).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        ProtectionError::Crypto(CryptoError::InvalidPayload)
    ));
}
