use async_trait::async_trait;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use training_portal::{
    AppState, PortalError, PortalResult,
    access::{Role, RoleSet},
    auth::AuthUser,
    config::AppConfig,
    error::AuthError,
    handlers::{self, ImageUploadParams},
    models::{
        FolderRequest, LoginRequest, ModuleRequest, ModuleSearch, MoveRequest,
        ReplaceStepsRequest, Step, UpdateRoleRequest, User, UserFilter,
    },
    reorder::Direction,
    repository::{InMemoryRepository, ModuleFilter, Repository},
    session::{AuthProvider, Session},
    storage::MockStorageService,
};
use uuid::Uuid;

// --- Mock auth provider ---

#[derive(Default)]
struct MockAuthProvider {
    session_for: Option<Uuid>,
    signed_out: Mutex<Vec<String>>,
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn sign_in_with_password(&self, _email: &str, password: &str) -> PortalResult<Session> {
        match self.session_for {
            Some(user_id) if password == "correct" => Ok(Session {
                user_id,
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            }),
            _ => Err(AuthError::InvalidCredentials.into()),
        }
    }

    async fn refresh(&self, _refresh_token: &str) -> PortalResult<Session> {
        Err(AuthError::SessionExpired.into())
    }

    async fn sign_out(&self, access_token: &str) -> PortalResult<()> {
        self.signed_out.lock().unwrap().push(access_token.to_string());
        Ok(())
    }
}

// --- Fixtures ---

struct Fixture {
    state: AppState,
    repo: Arc<InMemoryRepository>,
    storage: MockStorageService,
    auth: Arc<MockAuthProvider>,
}

fn fixture_with_auth(auth: MockAuthProvider) -> Fixture {
    let repo = Arc::new(InMemoryRepository::new());
    let storage = MockStorageService::new();
    let auth = Arc::new(auth);
    let state = AppState {
        repo: repo.clone(),
        storage: Arc::new(storage.clone()),
        auth: auth.clone(),
        config: AppConfig::default(),
    };
    Fixture {
        state,
        repo,
        storage,
        auth,
    }
}

fn fixture() -> Fixture {
    fixture_with_auth(MockAuthProvider::default())
}

async fn seed_user(repo: &InMemoryRepository, role: Role) -> AuthUser {
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@bank.example", role.as_str()),
        role,
        created_at: Utc::now(),
    };
    repo.insert_user(user.clone()).await;
    AuthUser { id: user.id, role }
}

fn module_req(title: &str, folder_id: Option<Uuid>, view: Role, edit: Role) -> ModuleRequest {
    ModuleRequest {
        title: title.to_string(),
        description: None,
        folder_id,
        view_roles: RoleSet::only(view),
        edit_roles: RoleSet::only(edit),
        steps: None,
    }
}

fn folder_req(name: &str) -> FolderRequest {
    FolderRequest {
        name: name.to_string(),
        description: None,
    }
}

// --- Session handlers ---

#[tokio::test]
async fn test_login_returns_tokens_and_user() {
    let user_id = Uuid::new_v4();
    let fx = fixture_with_auth(MockAuthProvider {
        session_for: Some(user_id),
        ..Default::default()
    });
    fx.repo
        .insert_user(User {
            id: user_id,
            email: "a@b.c".to_string(),
            role: Role::Asm,
            created_at: Utc::now(),
        })
        .await;

    let Json(response) = handlers::login(
        State(fx.state.clone()),
        Json(LoginRequest {
            email: "a@b.c".to_string(),
            password: "correct".to_string(),
        }),
    )
    .await
    .unwrap();

    assert_eq!(response.access_token, "access");
    assert_eq!(response.user.role, Role::Asm);
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let fx = fixture_with_auth(MockAuthProvider {
        session_for: Some(Uuid::new_v4()),
        ..Default::default()
    });
    let err = handlers::login(
        State(fx.state.clone()),
        Json(LoginRequest {
            email: "a@b.c".to_string(),
            password: "wrong".to_string(),
        }),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(err.code(), "invalid_credentials");
}

#[tokio::test]
async fn test_login_without_portal_user_signs_back_out() {
    let fx = fixture_with_auth(MockAuthProvider {
        session_for: Some(Uuid::new_v4()),
        ..Default::default()
    });
    let err = handlers::login(
        State(fx.state.clone()),
        Json(LoginRequest {
            email: "ghost@b.c".to_string(),
            password: "correct".to_string(),
        }),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PortalError::Auth(AuthError::UnknownUser)));
    assert_eq!(fx.auth.signed_out.lock().unwrap().as_slice(), ["access"]);
}

#[tokio::test]
async fn test_login_requires_both_fields() {
    let fx = fixture();
    let err = handlers::login(
        State(fx.state.clone()),
        Json(LoginRequest {
            email: " ".to_string(),
            password: "x".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logout_revokes_bearer_token() {
    let fx = fixture();
    let user = seed_user(&fx.repo, Role::Rm).await;
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok-123"));

    let status = handlers::logout(user, State(fx.state.clone()), headers).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(fx.auth.signed_out.lock().unwrap().as_slice(), ["tok-123"]);
}

#[tokio::test]
async fn test_me_reports_navigation() {
    let fx = fixture();
    let user = seed_user(&fx.repo, Role::BackOffice).await;

    let Json(profile) = handlers::get_me(user, State(fx.state.clone())).await.unwrap();

    assert_eq!(profile.role_name, "Back Office");
    assert!(profile.navigation.module_management);
    assert!(!profile.navigation.user_management);
}

// --- Content reads ---

#[tokio::test]
async fn test_module_hidden_from_junior_role() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let asm = seed_user(&fx.repo, Role::Asm).await;

    let Json(open) = handlers::create_module(
        admin.clone(),
        State(fx.state.clone()),
        Json(module_req("open", None, Role::MarketLead, Role::BackOffice)),
    )
    .await
    .map(|(_, json)| json)
    .unwrap();
    let Json(restricted) = handlers::create_module(
        admin.clone(),
        State(fx.state.clone()),
        Json(module_req("restricted", None, Role::BackOffice, Role::BackOffice)),
    )
    .await
    .map(|(_, json)| json)
    .unwrap();

    let Json(detail) = handlers::get_module(asm.clone(), State(fx.state.clone()), Path(open.id))
        .await
        .unwrap();
    assert!(!detail.can_edit);

    let err = handlers::get_module(asm, State(fx.state.clone()), Path(restricted.id))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_folder_view_and_dashboard() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let sales = seed_user(&fx.repo, Role::FrontlineSales).await;

    let (_, Json(folder)) = handlers::create_folder(
        admin.clone(),
        State(fx.state.clone()),
        Json(folder_req("Onboarding")),
    )
    .await
    .unwrap();
    for (title, view) in [("a", Role::FrontlineSales), ("b", Role::Rm)] {
        handlers::create_module(
            admin.clone(),
            State(fx.state.clone()),
            Json(module_req(title, Some(folder.id), view, Role::BackOffice)),
        )
        .await
        .unwrap();
    }

    let Json(view) = handlers::get_folder(
        sales.clone(),
        State(fx.state.clone()),
        Path(folder.id),
        Query(ModuleSearch::default()),
    )
    .await
    .unwrap();
    assert_eq!(view.modules.len(), 1);
    assert!(!view.modules[0].position.is_last);

    let Json(dashboard) = handlers::get_dashboard(sales.clone(), State(fx.state.clone()))
        .await
        .unwrap();
    assert_eq!(dashboard.total_modules, 1);
    assert_eq!(dashboard.folders[0].module_count, 1);

    let Json(folders) = handlers::get_folders(sales, State(fx.state.clone())).await.unwrap();
    assert_eq!(folders.len(), 1);
}

// --- Management ---

#[tokio::test]
async fn test_folder_crud_requires_back_office() {
    let fx = fixture();
    let rm = seed_user(&fx.repo, Role::Rm).await;
    let back_office = seed_user(&fx.repo, Role::BackOffice).await;

    let err = handlers::create_folder(rm, State(fx.state.clone()), Json(folder_req("x")))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let (status, Json(folder)) = handlers::create_folder(
        back_office.clone(),
        State(fx.state.clone()),
        Json(folder_req(" Products ")),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(folder.name, "Products");

    let Json(renamed) = handlers::update_folder(
        back_office.clone(),
        State(fx.state.clone()),
        Path(folder.id),
        Json(folder_req("Loans")),
    )
    .await
    .unwrap();
    assert_eq!(renamed.name, "Loans");
    assert_eq!(renamed.updated_by, Some(back_office.id));

    let status = handlers::delete_folder(back_office, State(fx.state.clone()), Path(folder.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_folder_name_is_required() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let err = handlers::create_folder(admin, State(fx.state.clone()), Json(folder_req("  ")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[tokio::test]
async fn test_module_in_unknown_folder_is_rejected() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let err = handlers::create_module(
        admin,
        State(fx.state.clone()),
        Json(module_req("m", Some(Uuid::new_v4()), Role::Rm, Role::Rm)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_module_left_in_deleted_folder_stays_editable() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;

    let (_, Json(folder)) =
        handlers::create_folder(admin.clone(), State(fx.state.clone()), Json(folder_req("Old")))
            .await
            .unwrap();
    let (_, Json(module)) = handlers::create_module(
        admin.clone(),
        State(fx.state.clone()),
        Json(module_req("m", Some(folder.id), Role::Rm, Role::Admin)),
    )
    .await
    .unwrap();
    handlers::delete_folder(admin.clone(), State(fx.state.clone()), Path(folder.id))
        .await
        .unwrap();

    // Saving the form as loaded sends back the dangling folder_id.
    let Json(updated) = handlers::update_module(
        admin.clone(),
        State(fx.state.clone()),
        Path(module.id),
        Json(module_req("renamed", Some(folder.id), Role::Rm, Role::Admin)),
    )
    .await
    .unwrap();
    assert_eq!(updated.title, "renamed");
    assert_eq!(updated.folder_id, Some(folder.id));

    let err = handlers::update_module(
        admin,
        State(fx.state.clone()),
        Path(module.id),
        Json(module_req("moved", Some(Uuid::new_v4()), Role::Rm, Role::Admin)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_module_edit_follows_edit_roles() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let back_office = seed_user(&fx.repo, Role::BackOffice).await;

    let (_, Json(module)) = handlers::create_module(
        back_office.clone(),
        State(fx.state.clone()),
        Json(module_req("m", None, Role::FrontlineSales, Role::Admin)),
    )
    .await
    .unwrap();

    let err = handlers::update_module(
        back_office.clone(),
        State(fx.state.clone()),
        Path(module.id),
        Json(module_req("renamed", None, Role::FrontlineSales, Role::Admin)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let err = handlers::delete_module(back_office, State(fx.state.clone()), Path(module.id))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let Json(updated) = handlers::update_module(
        admin.clone(),
        State(fx.state.clone()),
        Path(module.id),
        Json(module_req("renamed", None, Role::FrontlineSales, Role::Admin)),
    )
    .await
    .unwrap();
    assert_eq!(updated.title, "renamed");

    let status = handlers::delete_module(admin, State(fx.state.clone()), Path(module.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_replace_steps_renumbers_and_resolves_images() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let (_, Json(module)) = handlers::create_module(
        admin.clone(),
        State(fx.state.clone()),
        Json(module_req("m", None, Role::FrontlineSales, Role::BackOffice)),
    )
    .await
    .unwrap();

    let steps = vec![
        Step {
            order: 5,
            description: "open".to_string(),
            image_path: Some("one.png".to_string()),
        },
        Step {
            order: 5,
            description: "confirm".to_string(),
            image_path: Some(" ".to_string()),
        },
    ];
    let Json(saved) = handlers::replace_steps(
        admin.clone(),
        State(fx.state.clone()),
        Path(module.id),
        Json(ReplaceStepsRequest { steps }),
    )
    .await
    .unwrap();
    let saved = saved.unwrap();
    assert_eq!(saved.steps.iter().map(|s| s.order).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(saved.steps[1].image_path, None);

    let Json(detail) = handlers::get_module(admin.clone(), State(fx.state.clone()), Path(module.id))
        .await
        .unwrap();
    assert_eq!(
        detail.sub_modules[0].steps[0].image_url.as_deref(),
        Some("http://localhost:9000/mock-bucket/one.png")
    );

    let Json(cleared) = handlers::replace_steps(
        admin,
        State(fx.state.clone()),
        Path(module.id),
        Json(ReplaceStepsRequest { steps: vec![] }),
    )
    .await
    .unwrap();
    assert!(cleared.is_none());
}

#[tokio::test]
async fn test_move_module_is_admin_only_and_swaps() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let back_office = seed_user(&fx.repo, Role::BackOffice).await;

    let mut ids = Vec::new();
    for title in ["a", "b", "c"] {
        let (_, Json(m)) = handlers::create_module(
            admin.clone(),
            State(fx.state.clone()),
            Json(module_req(title, None, Role::FrontlineSales, Role::BackOffice)),
        )
        .await
        .unwrap();
        ids.push(m.id);
    }

    let err = handlers::move_module(
        back_office,
        State(fx.state.clone()),
        Path(ids[1]),
        Json(MoveRequest { direction: Direction::Up }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let Json(updates) = handlers::move_module(
        admin.clone(),
        State(fx.state.clone()),
        Path(ids[2]),
        Json(MoveRequest { direction: Direction::Up }),
    )
    .await
    .unwrap();
    assert_eq!(updates.len(), 2);

    let order: Vec<Uuid> = fx
        .repo
        .list_modules(ModuleFilter::Folder(None))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(order, vec![ids[0], ids[2], ids[1]]);

    // Already first: nothing to apply.
    let Json(updates) = handlers::move_module(
        admin,
        State(fx.state.clone()),
        Path(ids[0]),
        Json(MoveRequest { direction: Direction::Up }),
    )
    .await
    .unwrap();
    assert!(updates.is_empty());
}

#[tokio::test]
async fn test_move_unknown_folder() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let err = handlers::move_folder(
        admin,
        State(fx.state.clone()),
        Path(Uuid::new_v4()),
        Json(MoveRequest { direction: Direction::Down }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_image_stores_under_fresh_key() {
    let fx = fixture();
    let back_office = seed_user(&fx.repo, Role::BackOffice).await;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));

    let Json(uploaded) = handlers::upload_image(
        back_office,
        State(fx.state.clone()),
        Query(ImageUploadParams {
            filename: "../Screen Shot.PNG".to_string(),
        }),
        headers,
        Bytes::from_static(b"\x89PNG"),
    )
    .await
    .unwrap();

    assert!(uploaded.path.ends_with(".png"));
    assert!(!uploaded.path.contains(".."));
    assert!(uploaded.public_url.ends_with(&uploaded.path));
    let uploads = fx.storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, 4);
    assert_eq!(uploads[0].2, "image/png");
}

#[tokio::test]
async fn test_upload_rejects_non_images() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));

    let err = handlers::upload_image(
        admin,
        State(fx.state.clone()),
        Query(ImageUploadParams {
            filename: "doc.pdf".to_string(),
        }),
        headers,
        Bytes::from_static(b"%PDF"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert!(fx.storage.uploads().is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_reported() {
    let repo = Arc::new(InMemoryRepository::new());
    let admin = seed_user(&repo, Role::Admin).await;
    let state = AppState {
        repo,
        storage: Arc::new(MockStorageService::new_failing()),
        auth: Arc::new(MockAuthProvider::default()),
        config: AppConfig::default(),
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));

    let err = handlers::upload_image(
        admin,
        State(state),
        Query(ImageUploadParams {
            filename: "a.jpg".to_string(),
        }),
        headers,
        Bytes::from_static(b"jpg"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_user_management() {
    let fx = fixture();
    let admin = seed_user(&fx.repo, Role::Admin).await;
    let rm = seed_user(&fx.repo, Role::Rm).await;

    let err = handlers::list_users(rm.clone(), State(fx.state.clone()), Query(UserFilter::default()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let Json(filtered) = handlers::list_users(
        admin.clone(),
        State(fx.state.clone()),
        Query(UserFilter {
            role: Some(Role::Rm),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, rm.id);

    let Json(updated) = handlers::update_user_role(
        admin.clone(),
        State(fx.state.clone()),
        Path(rm.id),
        Json(UpdateRoleRequest { role: Role::Asm }),
    )
    .await
    .unwrap();
    assert_eq!(updated.role, Role::Asm);

    let err = handlers::update_user_role(
        admin.clone(),
        State(fx.state.clone()),
        Path(admin.id),
        Json(UpdateRoleRequest { role: Role::Rm }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}
