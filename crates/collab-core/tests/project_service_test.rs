//! End-to-end tests of the project service against a real database, with a
//! canned completion client standing in for the LLM.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use collab_core::ProjectError;
use collab_core::plan::{CompletionClient, GenerationError};
use collab_core::project::{self, CreateProjectRequest, TaskNode};
use collab_core::team;
use collab_db::models::TaskStatus;
use collab_db::queries::{projects as project_db, tasks as task_db, teams as team_db};
use collab_test_utils::{create_test_db, drop_test_db, seed_user};

/// Answers every prompt with a fixed payload and records the prompts.
struct CannedPlanner {
    response: Result<String, ()>,
    prompts: Mutex<Vec<String>>,
}

impl CannedPlanner {
    fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            response: Err(()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for CannedPlanner {
    async fn complete_json(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.response {
            Ok(body) => Ok(body.clone()),
            Err(()) => Err(GenerationError::Status {
                status: 503,
                body: "overloaded".to_string(),
            }),
        }
    }
}

const LOGIN_PLAN: &str = r#"{"tasks":[{"name":"Design UI","duration":2,"dependencies":[],"subtasks":[]},{"name":"Implement API","duration":3,"dependencies":["Design UI"],"subtasks":[]}]}"#;

async fn set_status(pool: &sqlx::PgPool, user_id: Uuid, task_id: Uuid, status: TaskStatus) {
    let edit = project::TaskEdit {
        status: Some(status),
        ..Default::default()
    };
    project::update_task(pool, user_id, task_id, &edit)
        .await
        .expect("status update should succeed");
}

fn request(name: &str, goal: &str) -> CreateProjectRequest {
    CreateProjectRequest {
        name: name.to_string(),
        goal: goal.to_string(),
        ..Default::default()
    }
}

fn find<'a>(nodes: &'a [TaskNode], name: &str) -> &'a TaskNode {
    nodes
        .iter()
        .find(|n| n.task.name == name)
        .unwrap_or_else(|| panic!("no task named {name}"))
}

#[tokio::test]
async fn login_page_scenario() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let planner = CannedPlanner::new(LOGIN_PLAN);

    let detail = project::create_project_with_ai(
        &pool,
        &planner,
        owner.id,
        &request("Login", "Build a login page"),
    )
    .await
    .expect("create should succeed");

    assert_eq!(planner.calls(), 1);
    assert!(planner.prompts.lock().unwrap()[0].contains("Build a login page"));

    assert_eq!(detail.tasks.len(), 2);
    let design = find(&detail.tasks, "Design UI");
    let api = find(&detail.tasks, "Implement API");
    assert!(design.dependencies.is_empty());
    assert_eq!(api.dependencies, vec![design.task.id]);
    assert_eq!(design.task.duration, Some(2));
    assert_eq!(design.task.status, TaskStatus::Todo);
    assert_eq!(design.task.project_id, detail.project.id);
    assert_eq!(design.task.owner_id, owner.id);

    let top = project_db::list_top_level_task_ids(&pool, detail.project.id)
        .await
        .unwrap();
    assert_eq!(top, vec![design.task.id, api.task.id]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unknown_dependency_is_omitted() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let planner = CannedPlanner::new(
        r#"{"tasks":[{"name":"A","dependencies":["Nonexistent Task"]}]}"#,
    );

    let detail = project::create_project_with_ai(&pool, &planner, owner.id, &request("P", "goal"))
        .await
        .unwrap();

    assert_eq!(detail.tasks.len(), 1);
    assert!(detail.tasks[0].dependencies.is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn subtasks_are_never_top_level() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let planner = CannedPlanner::new(
        r#"{"roadmap":[
            {"name":"Backend","subtasks":[
                {"name":"Schema"},
                {"name":"Endpoints","dependencies":["Schema"],"subtasks":[{"name":"Auth"}]}
            ]},
            {"name":"Frontend","dependencies":["Backend"]}
        ]}"#,
    );

    let detail = project::create_project_with_ai(&pool, &planner, owner.id, &request("P", "goal"))
        .await
        .unwrap();

    let all = task_db::list_tasks_for_project(&pool, detail.project.id)
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    let top = project_db::list_top_level_task_ids(&pool, detail.project.id)
        .await
        .unwrap();
    for task in &all {
        assert_eq!(
            task.parent_id.is_none(),
            top.contains(&task.id),
            "{} parent/top-level mismatch",
            task.name
        );
    }

    let backend = find(&detail.tasks, "Backend");
    let endpoints = find(&backend.subtasks, "Endpoints");
    let schema = find(&backend.subtasks, "Schema");
    assert_eq!(endpoints.dependencies, vec![schema.task.id]);
    assert_eq!(endpoints.subtasks[0].task.name, "Auth");
    assert_eq!(find(&detail.tasks, "Frontend").dependencies, vec![backend.task.id]);

    let subtask_ids = task_db::list_subtask_ids(&pool, backend.task.id).await.unwrap();
    assert_eq!(subtask_ids, vec![schema.task.id, endpoints.task.id]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn top_level_order_round_trips() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let names = ["Kickoff", "Research", "Prototype", "Review", "Launch", "Retro"];
    let body = serde_json::json!(names
        .iter()
        .map(|n| serde_json::json!({"name": n}))
        .collect::<Vec<_>>())
    .to_string();
    let planner = CannedPlanner::new(&body);

    let detail = project::create_project_with_ai(&pool, &planner, owner.id, &request("P", "goal"))
        .await
        .unwrap();

    let listed: Vec<_> = project_db::list_top_level_tasks(&pool, detail.project.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(listed, names);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn validation_happens_before_generation() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let planner = CannedPlanner::new(LOGIN_PLAN);

    let err = project::create_project_with_ai(&pool, &planner, owner.id, &request("", "goal"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::Validation(_)));
    assert_eq!(err.to_string(), "Project name and goal are required");

    let mut with_team = request("P", "goal");
    with_team.team_id = Some(Uuid::new_v4());
    let err = project::create_project_with_ai(&pool, &planner, owner.id, &with_team)
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::NotFound(_)));

    assert_eq!(planner.calls(), 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn failed_generation_persists_nothing() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;

    let err = project::create_project_with_ai(
        &pool,
        &CannedPlanner::failing(),
        owner.id,
        &request("P", "goal"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProjectError::GenerationRequest(_)));

    let err = project::create_project_with_ai(
        &pool,
        &CannedPlanner::new("this is not json"),
        owner.id,
        &request("P", "goal"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProjectError::PlanFormat(_)));

    assert!(project::list_projects(&pool, owner.id).await.unwrap().is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn team_project_appends_every_task_to_team() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let member = seed_user(&pool, "Linus").await;
    let outsider = seed_user(&pool, "Eve").await;

    let platform = team::create_team(&pool, owner.id, "Platform").await.unwrap();
    team::request_join(&pool, member.id, platform.team.id).await.unwrap();
    team::respond_to_join(
        &pool,
        owner.id,
        platform.team.id,
        &team::JoinDecision {
            user_id: member.id,
            action: team::JoinAction::Approve,
        },
    )
    .await
    .unwrap();

    let planner = CannedPlanner::new(
        r#"[{"name":"A","subtasks":[{"name":"A1"},{"name":"A2"}]},{"name":"B"}]"#,
    );
    let mut req = request("Shared", "goal");
    req.team_id = Some(platform.team.id);
    let detail = project::create_project_with_ai(&pool, &planner, member.id, &req)
        .await
        .unwrap();

    let team_tasks = team_db::list_team_task_ids(&pool, platform.team.id).await.unwrap();
    assert_eq!(team_tasks.len(), 4);
    let all = task_db::list_tasks_for_project(&pool, detail.project.id)
        .await
        .unwrap();
    for task in &all {
        assert!(team_tasks.contains(&task.id));
        assert_eq!(task.team_id, Some(platform.team.id));
    }

    // Visible to the owner through the team, hidden from outsiders.
    assert_eq!(project::list_projects(&pool, owner.id).await.unwrap().len(), 1);
    assert!(project::list_projects(&pool, outsider.id).await.unwrap().is_empty());
    let err = project::get_project_detail(&pool, outsider.id, detail.project.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::NotFound(_)));

    // Outsiders cannot attach projects to the team.
    let err = project::create_project_with_ai(&pool, &planner, outsider.id, &req)
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::Authorization(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn progress_counts_completed_top_level_tasks() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let planner = CannedPlanner::new(
        r#"{"tasks":[{"name":"A","subtasks":[{"name":"A1"}]},{"name":"B"},{"name":"C"},{"name":"D"}]}"#,
    );
    let detail = project::create_project_with_ai(&pool, &planner, owner.id, &request("P", "goal"))
        .await
        .unwrap();
    assert_eq!(detail.progress.percent, 0);

    let a = find(&detail.tasks, "A");
    set_status(&pool, owner.id, a.task.id, TaskStatus::Completed).await;
    // Subtasks do not count toward progress.
    set_status(&pool, owner.id, a.subtasks[0].task.id, TaskStatus::Completed).await;

    let summaries = project::list_projects(&pool, owner.id).await.unwrap();
    assert_eq!(summaries[0].progress.total, 4);
    assert_eq!(summaries[0].progress.completed, 1);
    assert_eq!(summaries[0].progress.percent, 25);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn delete_removes_all_tasks_and_is_owner_only() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let member = seed_user(&pool, "Linus").await;
    let platform = team::create_team(&pool, owner.id, "Platform").await.unwrap();
    team::request_join(&pool, member.id, platform.team.id).await.unwrap();
    team::respond_to_join(
        &pool,
        owner.id,
        platform.team.id,
        &team::JoinDecision {
            user_id: member.id,
            action: team::JoinAction::Approve,
        },
    )
    .await
    .unwrap();

    let mut req = request("P", "goal");
    req.team_id = Some(platform.team.id);
    let detail = project::create_project_with_ai(
        &pool,
        &CannedPlanner::new(r#"[{"name":"A","subtasks":[{"name":"A1"}]},{"name":"B"}]"#),
        owner.id,
        &req,
    )
    .await
    .unwrap();
    let project_id = detail.project.id;
    assert_eq!(task_db::list_tasks_for_project(&pool, project_id).await.unwrap().len(), 3);

    let err = project::delete_project(&pool, member.id, project_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::Authorization(_)));

    project::delete_project(&pool, owner.id, project_id).await.unwrap();
    assert_eq!(task_db::list_tasks_for_project(&pool, project_id).await.unwrap().len(), 0);
    assert!(team_db::list_team_task_ids(&pool, platform.team.id).await.unwrap().is_empty());

    let err = project::delete_project(&pool, owner.id, project_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::NotFound(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn manual_tasks_and_edits() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let helper = seed_user(&pool, "Linus").await;
    let detail = project::create_project_with_ai(
        &pool,
        &CannedPlanner::new(LOGIN_PLAN),
        owner.id,
        &request("Login", "Build a login page"),
    )
    .await
    .unwrap();
    let design = find(&detail.tasks, "Design UI").task.id;

    let sub: project::CreateTaskRequest = serde_json::from_value(serde_json::json!({
        "projectId": detail.project.id,
        "parentId": design,
        "name": "Wireframes",
        "duration": 1
    }))
    .unwrap();
    let created = project::create_task(&pool, owner.id, &sub).await.unwrap();
    assert_eq!(created.task.parent_id, Some(design));

    let top: project::CreateTaskRequest = serde_json::from_value(serde_json::json!({
        "projectId": detail.project.id,
        "name": "Deploy"
    }))
    .unwrap();
    let deploy = project::create_task(&pool, owner.id, &top).await.unwrap();
    let top_ids = project_db::list_top_level_task_ids(&pool, detail.project.id)
        .await
        .unwrap();
    assert_eq!(top_ids.len(), 3);
    assert_eq!(top_ids[2], deploy.task.id);

    let design_detail = project::get_task_detail(&pool, owner.id, design).await.unwrap();
    assert_eq!(design_detail.subtasks, vec![created.task.id]);

    let edit: project::TaskEdit = serde_json::from_value(serde_json::json!({
        "status": "In Progress",
        "priority": "high",
        "assignee": {"id": helper.id, "kind": "user"}
    }))
    .unwrap();
    let edited = project::update_task(&pool, owner.id, design, &edit).await.unwrap();
    assert_eq!(edited.task.status, TaskStatus::InProgress);
    assert_eq!(edited.task.assignee_id, Some(helper.id));
    assert_eq!(edited.task.name, "Design UI");

    let bad_assignee: project::TaskEdit = serde_json::from_value(serde_json::json!({
        "assignee": {"id": Uuid::new_v4(), "kind": "team"}
    }))
    .unwrap();
    let err = project::update_task(&pool, owner.id, design, &bad_assignee)
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::Validation(_)));

    let cleared: project::TaskEdit =
        serde_json::from_value(serde_json::json!({ "assignee": null })).unwrap();
    let edited = project::update_task(&pool, owner.id, design, &cleared).await.unwrap();
    assert_eq!(edited.task.assignee_id, None);
    assert_eq!(edited.task.priority, Some(collab_db::models::Priority::High));

    let no_priority: project::TaskEdit =
        serde_json::from_value(serde_json::json!({ "priority": null })).unwrap();
    let edited = project::update_task(&pool, owner.id, design, &no_priority).await.unwrap();
    assert_eq!(edited.task.priority, None);
    assert_eq!(edited.task.status, TaskStatus::InProgress);

    // Not visible to someone outside the project.
    let err = project::get_task_detail(&pool, helper.id, design).await.unwrap_err();
    assert!(matches!(err, ProjectError::NotFound(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn manual_project_starts_empty() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let outsider = seed_user(&pool, "Eve").await;

    let err = project::create_project(&pool, owner.id, &request("  ", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectError::Validation(_)));

    let mut req = request("Backlog", "");
    req.due_date = Some("2026-12-01".to_string());
    let detail = project::create_project(&pool, owner.id, &req).await.unwrap();
    assert_eq!(detail.project.name, "Backlog");
    assert_eq!(detail.project.goal, "");
    assert!(detail.project.due_date.is_some());
    assert!(detail.tasks.is_empty());
    assert_eq!(detail.progress.total, 0);

    let platform = team::create_team(&pool, owner.id, "Platform").await.unwrap();
    let mut req = request("Shared backlog", "");
    req.team_id = Some(platform.team.id);
    let err = project::create_project(&pool, outsider.id, &req).await.unwrap_err();
    assert!(matches!(err, ProjectError::Authorization(_)));
    let shared = project::create_project(&pool, owner.id, &req).await.unwrap();
    assert_eq!(shared.project.team_id, Some(platform.team.id));

    assert_eq!(project::list_projects(&pool, owner.id).await.unwrap().len(), 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_listing_follows_project_visibility() {
    let (pool, db_name) = create_test_db().await;
    let owner = seed_user(&pool, "Ada").await;
    let member = seed_user(&pool, "Linus").await;
    let outsider = seed_user(&pool, "Eve").await;

    let platform = team::create_team(&pool, owner.id, "Platform").await.unwrap();
    team::request_join(&pool, member.id, platform.team.id).await.unwrap();
    team::respond_to_join(
        &pool,
        owner.id,
        platform.team.id,
        &team::JoinDecision {
            user_id: member.id,
            action: team::JoinAction::Approve,
        },
    )
    .await
    .unwrap();

    let mut req = request("Shared", "Build a login page");
    req.team_id = Some(platform.team.id);
    let shared = project::create_project_with_ai(&pool, &CannedPlanner::new(LOGIN_PLAN), owner.id, &req)
        .await
        .unwrap();
    let private = project::create_project_with_ai(
        &pool,
        &CannedPlanner::new(r#"[{"name":"Solo"}]"#),
        owner.id,
        &request("Private", "goal"),
    )
    .await
    .unwrap();

    assert_eq!(project::list_tasks(&pool, owner.id).await.unwrap().len(), 3);

    let seen = project::list_tasks(&pool, member.id).await.unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|t| t.project_id == shared.project.id));
    assert!(seen.iter().all(|t| t.project_id != private.project.id));

    assert!(project::list_tasks(&pool, outsider.id).await.unwrap().is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}
