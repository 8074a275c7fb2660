//! End-to-end capsule tests: save through one engine, open through another.
//!
//! Covers round trips for every cipher configuration, tamper detection,
//! the validity window, key rotation, the key-length guard and the
//! concrete storage backends.

use std::cell::Cell;
use std::rc::Rc;

use proptest::prelude::*;
use serde_json::{json, Value};
use tcrypto_core::{CipherChoice, EngineConfig};
use tcrypto_crypto::cipher::from_choice;
use tcrypto_crypto::{
    Aes128Cbc, Aes256Cbc, Capsule, CapsuleOptions, CipherProvider, CompressStage, CryptoError,
    DataMap, FileKeyProvider, KeyFile, KeyMaterial, KeyPair, KeyRing, KeyRole, ManualClock,
    OsRandom, Pipeline, SystemClock,
};
use tcrypto_storage::{
    CookieStorage, FileStorage, MemoryStorage, PlainStringStorage, StorageBackend,
    StorageResult, TokenEncoding,
};

const NOW: u64 = 1_700_000_000;

fn pair(auth: u8, enc: u8) -> KeyPair {
    KeyPair::new(
        KeyMaterial::from_vec(vec![auth; 32]),
        KeyMaterial::from_vec(vec![enc; 32]),
        NOW,
    )
}

fn ring() -> KeyRing {
    KeyRing::with_primary("v1", pair(0x41, 0x41)).unwrap()
}

fn cipher(choice: CipherChoice) -> Option<Box<dyn CipherProvider>> {
    from_choice(choice)
}

fn open<S: StorageBackend>(
    keys: KeyRing,
    storage: S,
    choice: CipherChoice,
    clock: &ManualClock,
) -> Capsule<S> {
    Capsule::open_with(
        keys,
        storage,
        Pipeline::default(),
        cipher(choice),
        CapsuleOptions::default(),
        Box::new(OsRandom),
        Box::new(clock.clone()),
    )
    .unwrap()
}

fn sample() -> DataMap {
    let mut map = DataMap::new();
    map.insert("uid".into(), json!("42"));
    map.insert("roles".into(), json!(["admin", "ops"]));
    map.insert("prefs".into(), json!({"theme": "dark", "page_size": 50}));
    map.insert("ratio".into(), json!(0.25));
    map.insert("active".into(), json!(true));
    map
}

fn save_map(map: &DataMap, choice: CipherChoice, clock: &ManualClock) -> Vec<u8> {
    let mut capsule = open(ring(), MemoryStorage::new(), choice, clock);
    for (k, v) in map {
        capsule.set(k.clone(), v.clone()).unwrap();
    }
    capsule.save().unwrap().unwrap()
}

fn extract(bytes: Vec<u8>, choice: CipherChoice, clock: &ManualClock) -> DataMap {
    open(ring(), MemoryStorage::with_capsule(bytes), choice, clock)
        .data()
        .clone()
}

const ALL_CIPHERS: [CipherChoice; 3] = [
    CipherChoice::None,
    CipherChoice::Aes128Cbc,
    CipherChoice::Aes256Cbc,
];

#[test]
fn roundtrip_every_cipher() {
    let clock = ManualClock::new(NOW);
    for choice in ALL_CIPHERS {
        let bytes = save_map(&sample(), choice, &clock);
        assert_eq!(extract(bytes, choice, &clock), sample(), "{choice:?}");
    }
}

#[test]
fn roundtrip_with_compression_stage() {
    let clock = ManualClock::new(NOW);
    for choice in ALL_CIPHERS {
        let pipeline = || Pipeline::default().with(Box::new(CompressStage::default()));

        let mut writer = Capsule::open_with(
            ring(),
            MemoryStorage::new(),
            pipeline(),
            cipher(choice),
            CapsuleOptions::default(),
            Box::new(OsRandom),
            Box::new(clock.clone()),
        )
        .unwrap();
        writer.set("blob", "a".repeat(512)).unwrap();
        let bytes = writer.save().unwrap().unwrap();

        let reader = Capsule::open_with(
            ring(),
            MemoryStorage::with_capsule(bytes.clone()),
            pipeline(),
            cipher(choice),
            CapsuleOptions::default(),
            Box::new(OsRandom),
            Box::new(clock.clone()),
        )
        .unwrap();
        assert_eq!(reader.get("blob"), Some(&json!("a".repeat(512))), "{choice:?}");

        if choice == CipherChoice::None {
            assert!(bytes.len() < 200, "plaintext capsule should be compressed");
        } else {
            assert!(bytes.len() > 512, "encrypted capsule must skip compression");
        }
    }
}

#[test]
fn concrete_uid_scenario() {
    let clock = ManualClock::new(NOW);
    let mut writer = open(ring(), MemoryStorage::new(), CipherChoice::Aes256Cbc, &clock);
    writer.set("uid", "42").unwrap();
    let bytes = writer.save().unwrap().unwrap();

    let reader = open(
        ring(),
        MemoryStorage::with_capsule(bytes.clone()),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    let mut expected = DataMap::new();
    expected.insert("uid".into(), json!("42"));
    assert_eq!(reader.data(), &expected);

    let truncated = open(
        ring(),
        MemoryStorage::with_capsule(bytes[..10].to_vec()),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    assert!(truncated.is_empty());
    assert!(truncated.storage().is_empty(), "invalid capsule is removed");
}

#[test]
fn single_byte_tamper_never_populates() {
    let clock = ManualClock::new(NOW);
    for choice in ALL_CIPHERS {
        let bytes = save_map(&sample(), choice, &clock);
        for pos in 0..bytes.len() {
            for flip in [0x01u8, 0x80] {
                let mut tampered = bytes.clone();
                tampered[pos] ^= flip;
                let map = extract(tampered, choice, &clock);
                assert!(
                    map.is_empty(),
                    "{choice:?}: flipping byte {pos} with {flip:#04x} was accepted"
                );
            }
        }
    }
}

#[test]
fn wrong_cipher_configuration_yields_empty() {
    let clock = ManualClock::new(NOW);
    let bytes = save_map(&sample(), CipherChoice::Aes256Cbc, &clock);
    assert!(extract(bytes.clone(), CipherChoice::None, &clock).is_empty());
    assert!(extract(bytes, CipherChoice::Aes128Cbc, &clock).is_empty());
}

#[test]
fn wrong_keys_yield_empty() {
    let clock = ManualClock::new(NOW);
    let bytes = save_map(&sample(), CipherChoice::Aes256Cbc, &clock);

    let other = KeyRing::with_primary("v1", pair(0x51, 0x41)).unwrap();
    let reader = open(
        other,
        MemoryStorage::with_capsule(bytes),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    assert!(reader.is_empty());
}

#[test]
fn validity_window_with_manual_clock() {
    let clock = ManualClock::new(NOW);
    let bytes = save_map(&sample(), CipherChoice::Aes256Cbc, &clock);

    clock.set(NOW + 3600);
    assert_eq!(
        extract(bytes.clone(), CipherChoice::Aes256Cbc, &clock),
        sample(),
        "expiry itself is inside the window"
    );

    clock.set(NOW + 3601);
    assert!(extract(bytes.clone(), CipherChoice::Aes256Cbc, &clock).is_empty());

    clock.set(NOW - 1);
    assert!(
        extract(bytes, CipherChoice::Aes256Cbc, &clock).is_empty(),
        "capsule from the future"
    );
}

#[test]
fn expiry_after_real_sleep() {
    let options = CapsuleOptions {
        max_lifetime: 1,
        ..Default::default()
    };
    let mut writer = Capsule::open(
        ring(),
        MemoryStorage::new(),
        Pipeline::default(),
        Some(Box::new(Aes256Cbc)),
        options.clone(),
    )
    .unwrap();
    writer.set("uid", "42").unwrap();
    let bytes = writer.save().unwrap().unwrap();

    std::thread::sleep(std::time::Duration::from_secs(2));

    let reader = Capsule::open_with(
        ring(),
        MemoryStorage::with_capsule(bytes),
        Pipeline::default(),
        Some(Box::new(Aes256Cbc)),
        options,
        Box::new(OsRandom),
        Box::new(SystemClock),
    )
    .unwrap();
    assert!(reader.is_empty());
}

#[test]
fn key_rotation_keeps_old_capsules_readable() {
    let clock = ManualClock::new(NOW);
    let bytes = save_map(&sample(), CipherChoice::Aes256Cbc, &clock);
    assert_eq!(&bytes[16..19], b"v1$");

    let mut rotated = ring();
    rotated.insert("v2", pair(0x61, 0x62)).unwrap();
    rotated.set_primary("v2").unwrap();

    let mut reader = open(
        rotated.clone(),
        MemoryStorage::with_capsule(bytes),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    assert_eq!(reader.data(), &sample());

    let resaved = reader.save().unwrap().unwrap();
    assert_eq!(&resaved[16..19], b"v2$");

    // v2 capsules still open once v1 is pruned.
    let mut pruned = rotated;
    pruned.remove("v1");
    let reader = open(
        pruned,
        MemoryStorage::with_capsule(resaved),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    assert_eq!(reader.data(), &sample());
}

/// Records whether the engine ever touched storage.
struct Tripwire(Rc<Cell<bool>>);

impl StorageBackend for Tripwire {
    fn fetch(&mut self) -> StorageResult<Option<Vec<u8>>> {
        self.0.set(true);
        Ok(None)
    }

    fn save(&mut self, _capsule: &[u8]) -> StorageResult<()> {
        self.0.set(true);
        Ok(())
    }

    fn remove(&mut self) -> StorageResult<()> {
        self.0.set(true);
        Ok(())
    }
}

#[test]
fn short_keys_rejected_before_storage_access() {
    let cases = [
        (KeyRole::Authentication, 31, 32),
        (KeyRole::Encryption, 32, 31),
    ];
    for (role, auth_len, enc_len) in cases {
        let keys = KeyRing::with_primary(
            "v1",
            KeyPair::new(
                KeyMaterial::from_vec(vec![0x41; auth_len]),
                KeyMaterial::from_vec(vec![0x41; enc_len]),
                NOW,
            ),
        )
        .unwrap();

        let touched = Rc::new(Cell::new(false));
        let result = Capsule::open(
            keys,
            Tripwire(touched.clone()),
            Pipeline::default(),
            Some(Box::new(Aes128Cbc)),
            CapsuleOptions::default(),
        );

        match result {
            Err(CryptoError::InsufficientKeyMaterial { role: r, len }) => {
                assert_eq!(r, role);
                assert_eq!(len, 31);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("31-byte {role} key was accepted"),
        }
        assert!(!touched.get(), "storage was accessed before the key check");
    }
}

#[test]
fn empty_key_ring_is_rejected() {
    let result = Capsule::open(
        KeyRing::new(),
        MemoryStorage::new(),
        Pipeline::default(),
        None,
        CapsuleOptions::default(),
    );
    assert!(matches!(
        result,
        Err(CryptoError::InsufficientKeyMaterial { len: 0, .. })
    ));
}

#[test]
fn plain_string_token_flow() {
    let clock = ManualClock::new(NOW);
    let mut writer = open(
        ring(),
        PlainStringStorage::empty(TokenEncoding::Base64),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    writer.set("uid", "42").unwrap();
    writer.save().unwrap();
    let token = writer.storage().token_str().unwrap().to_string();

    let reader = open(
        ring(),
        PlainStringStorage::new(token, TokenEncoding::Base64),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    assert_eq!(reader.get("uid"), Some(&json!("42")));

    let garbage = open(
        ring(),
        PlainStringStorage::new("%%% not base64 %%%", TokenEncoding::Base64),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    assert!(garbage.is_empty());
}

fn cookie_value(header: &str) -> String {
    let (_, rest) = header.split_once('=').unwrap();
    rest.split(';').next().unwrap().to_string()
}

#[test]
fn cookie_flow() {
    let clock = ManualClock::new(NOW);
    let mut writer = open(
        ring(),
        CookieStorage::default().https(true),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    writer.set("uid", "42").unwrap();
    writer.save().unwrap();

    let headers = writer.storage_mut().take_headers();
    let set_cookie = headers.last().unwrap();
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("HttpOnly"));

    let reader = open(
        ring(),
        CookieStorage::new("tcrypto", Some(cookie_value(set_cookie))).https(true),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    assert_eq!(reader.get("uid"), Some(&json!("42")));
}

#[test]
fn cookie_refuses_plain_http() {
    let clock = ManualClock::new(NOW);
    let mut capsule = open(
        ring(),
        CookieStorage::default(),
        CipherChoice::Aes256Cbc,
        &clock,
    );
    capsule.set("uid", "42").unwrap();
    assert!(matches!(capsule.save(), Err(CryptoError::Storage(_))));
}

#[test]
fn file_storage_with_key_file() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("keys.json");
    let capsule_path = dir.path().join("state.capsule");

    let mut key_file = KeyFile::new();
    key_file.add_key(&OsRandom, 3, NOW).unwrap();
    key_file.save(&key_path, 0o600).unwrap();

    let clock = ManualClock::new(NOW);
    let open_file = || {
        Capsule::open_with(
            FileKeyProvider::open(&key_path).unwrap(),
            FileStorage::new(&capsule_path),
            Pipeline::default(),
            Some(Box::new(Aes256Cbc)),
            CapsuleOptions::default(),
            Box::new(OsRandom),
            Box::new(clock.clone()),
        )
        .unwrap()
    };

    let mut writer = open_file();
    writer.set("counter", 1).unwrap();
    writer.save().unwrap();
    assert!(capsule_path.exists());

    let mut reader = open_file();
    assert_eq!(reader.get("counter"), Some(&json!(1)));

    reader.destroy().unwrap();
    assert!(!capsule_path.exists());
    assert!(open_file().is_empty());
}

#[test]
fn capsule_from_config() {
    let config = EngineConfig {
        max_lifetime_secs: 60,
        cipher: CipherChoice::Aes128Cbc,
        compress: true,
        ..Default::default()
    };
    let clock = ManualClock::new(NOW);
    let build = |storage: MemoryStorage| {
        Capsule::open_with(
            ring(),
            storage,
            Pipeline::from_config(&config),
            from_choice(config.cipher),
            CapsuleOptions::from_config(&config),
            Box::new(OsRandom),
            Box::new(clock.clone()),
        )
        .unwrap()
    };

    let mut writer = build(MemoryStorage::new());
    writer.set("uid", "42").unwrap();
    let bytes = writer.save().unwrap().unwrap();

    clock.advance(60);
    assert_eq!(build(MemoryStorage::with_capsule(bytes.clone())).len(), 1);
    clock.advance(1);
    assert!(build(MemoryStorage::with_capsule(bytes)).is_empty());
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[ -~]{0,40}".prop_map(Value::from),
        proptest::collection::vec(any::<u8>().prop_map(Value::from), 0..8)
            .prop_map(Value::Array),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_map_roundtrips(
        map in proptest::collection::btree_map("[a-zA-Z0-9_]{1,16}", arb_value(), 1..10),
        idx in 0usize..3,
    ) {
        let choice = ALL_CIPHERS[idx];
        let clock = ManualClock::new(NOW);
        let bytes = save_map(&map, choice, &clock);
        prop_assert_eq!(extract(bytes, choice, &clock), map);
    }
}
