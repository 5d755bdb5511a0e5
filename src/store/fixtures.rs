//! Seed helpers shared by store and API tests.

use super::models::{Area, Board, MilestoneWithProgress, Project};
use super::{BenDb, NewArea, NewBoard, NewMilestone, NewProject};

pub(crate) fn area(db: &BenDb, name: &str) -> Area {
    db.create_area(&NewArea {
        name: name.into(),
        ..Default::default()
    })
    .expect("create area")
}

pub(crate) fn project(db: &BenDb, area_id: &str, title: &str) -> Project {
    db.create_project(&NewProject {
        area_id: area_id.into(),
        title: title.into(),
        ..Default::default()
    })
    .expect("create project")
}

pub(crate) fn project_in_new_area(db: &BenDb) -> (Area, Project) {
    let area = area(db, "Work");
    let project = project(db, &area.id, "Launch");
    (area, project)
}

/// A project with one board carrying the default columns.
pub(crate) fn board(db: &BenDb) -> (Project, Board) {
    let (_, project) = project_in_new_area(db);
    let board = db
        .create_board(&NewBoard {
            project_id: project.id.clone(),
            name: "Main".into(),
            columns: None,
        })
        .expect("create board");
    (project, board)
}

pub(crate) fn milestone(db: &BenDb, project_id: &str, title: &str) -> MilestoneWithProgress {
    db.create_milestone(&NewMilestone {
        project_id: project_id.into(),
        title: title.into(),
        ..Default::default()
    })
    .expect("create milestone")
}
