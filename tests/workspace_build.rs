//! End-to-end tests driving the Workspace Assembler across small
//! on-disk ancestor-chain fixtures, covering the scenarios from the
//! testable-properties section of the design.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use jinjaform::config::Paths;
use jinjaform::render::Extensions;
use jinjaform::store::VariableStore;
use jinjaform::workspace;

fn write(base: &Path, relative: &str, contents: &str) {
    let path = base.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn paths_for(project_root: &Path, cwd: &Path) -> Paths {
    Paths {
        cwd: cwd.to_path_buf(),
        project_root: project_root.to_path_buf(),
        jinjaform_dir: cwd.join(".jinjaform"),
        jinjaform_root: project_root.join(".jinjaform"),
        terraform_dir: cwd.join(".jinjaform").join(".terraform"),
        terraform_bin: "terraform".to_string(),
    }
}

#[test]
fn inheritance_scenario_renders_leaf_override() {
    let root = tempfile::tempdir().unwrap();
    let project_root = root.path().to_path_buf();
    write(
        &project_root,
        "common.tf",
        "variable \"region\" { default = \"eu-west-1\" }\n",
    );
    let leaf = project_root.join("env").join("dev");
    write(&project_root, "env/dev/terraform.tfvars", "region = \"eu-west-2\"\n");
    write(&project_root, "env/dev/main.tf", "region = \"{{ var.region }}\"\n");

    let paths = paths_for(&project_root, &leaf);
    let store = Arc::new(VariableStore::new());
    let extensions = Arc::new(Extensions::default());

    workspace::create(&paths, store, extensions).unwrap();

    let main_tf = fs::read_to_string(paths.jinjaform_dir.join("main.tf")).unwrap();
    assert!(main_tf.contains("eu-west-2"));

    let common_tf = fs::read_to_string(paths.jinjaform_dir.join("common.tf")).unwrap();
    assert_eq!(common_tf.matches("jinjaform:").count(), 1);
}

#[test]
fn combine_ordering_scenario_leaf_wins_and_all_fragments_present() {
    let root = tempfile::tempdir().unwrap();
    let project_root = root.path().to_path_buf();
    write(&project_root, "terraform.tfvars", "name = \"root\"\n");
    write(&project_root, "mid/terraform.tfvars", "name = \"mid\"\n");
    write(&project_root, "mid/leaf/terraform.tfvars", "name = \"leaf\"\n");
    let leaf = project_root.join("mid").join("leaf");

    let paths = paths_for(&project_root, &leaf);
    let store = Arc::new(VariableStore::new());
    let extensions = Arc::new(Extensions::default());

    workspace::create(&paths, Arc::clone(&store), extensions).unwrap();

    let combined = fs::read_to_string(paths.jinjaform_dir.join("terraform.tfvars")).unwrap();
    assert_eq!(combined.matches("jinjaform:").count(), 3);
    assert!(combined.find("leaf/terraform.tfvars").unwrap() < combined.find("mid/terraform.tfvars").unwrap());

    store.register_worker(jinjaform::store::WorkerId(42));
    let value = store.lookup(jinjaform::store::WorkerId(42), "name").unwrap();
    assert_eq!(value, hcl::Value::String("leaf".into()));
}

#[test]
fn cross_template_dependency_resolves_across_files() {
    let root = tempfile::tempdir().unwrap();
    let project_root = root.path().to_path_buf();
    write(&project_root, "vars.tf", "variable \"name\" { default = \"demo\" }\n");
    write(&project_root, "main.tf", "label = \"{{ var.name }}\"\n");

    let paths = paths_for(&project_root, &project_root.join("sub"));
    fs::create_dir_all(&paths.cwd).unwrap();
    let store = Arc::new(VariableStore::new());
    let extensions = Arc::new(Extensions::default());

    workspace::create(&paths, store, extensions).unwrap();

    let main_tf = fs::read_to_string(paths.jinjaform_dir.join("main.tf")).unwrap();
    assert!(main_tf.contains("demo"));
}

#[test]
fn mutual_cross_template_dependency_reports_both_failures() {
    let root = tempfile::tempdir().unwrap();
    let project_root = root.path().to_path_buf();
    write(&project_root, "a.tf", "a = \"{{ var.b }}\"\n");
    write(&project_root, "b.tf", "b = \"{{ var.a }}\"\n");

    let paths = paths_for(&project_root, &project_root);
    let store = Arc::new(VariableStore::new());
    let extensions = Arc::new(Extensions::default());

    let err = workspace::create(&paths, store, extensions).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("var.a") || message.contains("var.b"));
}

#[test]
fn strict_undefined_fails_render_with_precise_message() {
    let root = tempfile::tempdir().unwrap();
    let project_root = root.path().to_path_buf();
    write(&project_root, "main.tf", "x = \"{{ var.missing }}\"\n");

    let paths = paths_for(&project_root, &project_root);
    let store = Arc::new(VariableStore::new());
    let extensions = Arc::new(Extensions::default());

    let err = workspace::create(&paths, store, extensions).unwrap_err();
    assert!(err.to_string().contains("var.missing cannot be resolved"));
}

#[test]
fn other_files_combine_without_provenance_header() {
    let root = tempfile::tempdir().unwrap();
    let project_root = root.path().to_path_buf();
    write(&project_root, "README.md", "root notes\n");
    write(&project_root, "sub/README.md", "sub notes\n");
    let leaf = project_root.join("sub");

    let paths = paths_for(&project_root, &leaf);
    let store = Arc::new(VariableStore::new());
    let extensions = Arc::new(Extensions::default());

    workspace::create(&paths, store, extensions).unwrap();

    let combined = fs::read_to_string(paths.jinjaform_dir.join("readme.md")).unwrap();
    assert!(!combined.contains("jinjaform:"));
    assert!(combined.contains("root notes"));
    assert!(combined.contains("sub notes"));
}

#[test]
fn workspace_clean_is_idempotent_on_missing_directory() {
    let root = tempfile::tempdir().unwrap();
    let project_root = root.path().to_path_buf();
    let paths = paths_for(&project_root, &project_root);
    assert!(workspace::clean(&paths).is_ok());
}

