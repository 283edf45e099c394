use gitlab_http::{Endpoint, GitlabClient, ListOptions, ResourceId, Sort, NO_PARAMS};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct Project {
    id: u64,
    path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    iid: u64,
    title: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let project_path = std::env::var("GITLAB_PROJECT")?;

    let client = GitlabClient::from_env()?;

    let project_id = ResourceId::from(project_path);
    let endpoint = Endpoint::get(format!("projects/{}", project_id.escaped()?));
    let (project, response) = client
        .request::<_, Project>(&endpoint, NO_PARAMS, &[])
        .await?;
    println!(
        "{} (id {}, status {})",
        project.path_with_namespace, project.id, response.status
    );

    let params = ListOptions::per_page(50).order_by("created_at", Sort::Desc);
    let mut issues = client.paginate::<_, Issue>(
        Endpoint::get(format!("projects/{}/issues", project.id)),
        Some(&params),
        Vec::new(),
    )?;

    while let Some(page) = issues.next_page().await? {
        for issue in page.items {
            println!("#{} {}", issue.iid, issue.title);
        }
    }

    Ok(())
}
