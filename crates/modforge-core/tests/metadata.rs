use modforge_core::candidate::{DependencyKind, DependencyRole};
use modforge_core::identity::ModIdentity;
use modforge_core::metadata::{normalize, NormalizeError, RawProject, RawVersion};
use modforge_core::version::ModVersion;

const VERSION: &str = r#"{
    "id": "tGB5ahOG",
    "project_id": "AANobbMI",
    "name": "Sodium 0.5.11",
    "version_number": "mc1.21-0.5.11",
    "date_published": "2024-07-05T10:00:00Z",
    "loaders": ["Fabric", "quilt"],
    "game_versions": ["1.21", "1.21.1"],
    "provides": ["Renderer"],
    "dependencies": [
        { "project_id": "P7dR8mSH", "dependency_type": "required", "version_range": ">=0.100" },
        { "project_id": "YL57xq9U", "dependency_type": "optional" },
        { "project_id": "OPTIFABR", "dependency_type": "incompatible" },
        { "project_id": "EMBEDDED", "dependency_type": "embedded" },
        { "version_id": "xyz", "dependency_type": "required" }
    ],
    "files": [
        { "url": "https://cdn/sources.jar", "filename": "sources.jar", "primary": false, "hashes": {} },
        { "url": "https://cdn/sodium.jar", "filename": "sodium.jar", "primary": true,
          "hashes": { "sha1": "aa", "sha512": "bb" } }
    ]
}"#;

fn lookup(id: &str) -> Option<ModIdentity> {
    match id {
        "P7dR8mSH" => Some(ModIdentity::new("fabric-api", id)),
        "YL57xq9U" => Some(ModIdentity::new("iris", id)),
        _ => None,
    }
}

#[test]
fn normalizes_modrinth_version() {
    let raw: RawVersion = serde_json::from_str(VERSION).unwrap();
    let identity = ModIdentity::new("sodium", "AANobbMI");
    let candidate = normalize(&raw, &identity, lookup).unwrap();

    assert_eq!(candidate.version_id, "tGB5ahOG");
    assert_eq!(candidate.to_string(), "sodium@mc1.21-0.5.11");
    assert!(candidate.loaders.contains("fabric"));
    assert!(candidate.provides.contains("renderer"));

    let deps = &candidate.dependencies;
    assert_eq!(deps.len(), 4);
    assert_eq!(deps[0].target.slug, "fabric-api");
    assert!(deps[0].range.contains(&ModVersion::parse("0.102.0")));
    assert_eq!(deps[1].kind, DependencyKind::Optional);
    assert!(deps[1].range.is_any());
    assert_eq!(deps[2].kind, DependencyKind::Incompatible);
    assert_eq!(deps[2].target.slug, "OPTIFABR");
    assert_eq!(deps[3].role, DependencyRole::Embedded);
    assert_eq!(deps[3].kind, DependencyKind::Required);

    let file = candidate.file.unwrap();
    assert_eq!(file.filename, "sodium.jar");
    assert_eq!(file.sha512.as_deref(), Some("bb"));
}

#[test]
fn bad_range_is_reported() {
    let mut raw: RawVersion = serde_json::from_str(VERSION).unwrap();
    raw.dependencies[0].version_range = Some(">=".to_string());
    let err = normalize(&raw, &ModIdentity::new("sodium", "AANobbMI"), lookup).unwrap_err();
    assert!(matches!(err, NormalizeError::Range { ref target, .. } if target == "fabric-api"));
}

#[test]
fn empty_version_number_is_rejected() {
    let mut raw: RawVersion = serde_json::from_str(VERSION).unwrap();
    raw.version_number = "  ".to_string();
    let err = normalize(&raw, &ModIdentity::new("sodium", "AANobbMI"), lookup).unwrap_err();
    assert_eq!(
        err,
        NormalizeError::EmptyVersion {
            version_id: "tGB5ahOG".to_string()
        }
    );
}

#[test]
fn project_metadata() {
    let project: RawProject = serde_json::from_str(
        r#"{ "id": "AANobbMI", "slug": "sodium", "title": "Sodium", "categories": ["optimization"] }"#,
    )
    .unwrap();
    let meta = project.metadata();
    assert_eq!(meta.identity, ModIdentity::new("sodium", "AANobbMI"));
    assert_eq!(meta.title.as_deref(), Some("Sodium"));
}
