//! users command - list, add and remove directory users

use super::{open_directory, CommandContext};
use crate::UserCommands;
use anyhow::{bail, Result};
use rollcall_core::types::{fields, FilterExpression, NewUser, SortCriteria, SortCriterion, User};
use rollcall_directory::{FindQuery, OperationOutcome, UserDirectory};
use serde::Serialize;

#[derive(Serialize)]
struct ListResult<'a> {
    users: &'a [User],
    total: usize,
}

pub async fn execute(ctx: &CommandContext, command: UserCommands) -> Result<()> {
    let mut directory = open_directory(ctx).await?;
    run(ctx, directory.as_mut(), command).await
}

async fn run(ctx: &CommandContext, directory: &mut dyn UserDirectory, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::List {
            prefix,
            group,
            sort,
            start,
            count,
        } => {
            let query = list_query(prefix.as_deref(), group.as_deref(), &sort, start, count)?;
            let users = directory.find(&query).await?;
            print_users(ctx, &users)
        }
        UserCommands::Add {
            user_name,
            password,
            email,
            display_name,
            groups,
        } => {
            let mut new_user = NewUser::new(user_name);
            new_user.password = password;
            new_user.email = email;
            new_user.display_name = display_name;
            new_user.groups = groups;
            let user = directory.add(new_user).await?;

            if ctx.is_json() {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                println!("added: {} ({})", user.user_name, user.id);
            }
            Ok(())
        }
        UserCommands::Remove { user_name } => {
            let Some(user) = directory.find_by_user_name(&user_name).await? else {
                bail!("no user named '{}'", user_name);
            };
            match directory.try_remove(user.id).await? {
                OperationOutcome::Done => {
                    println!("removed: {}", user.user_name);
                    Ok(())
                }
                OperationOutcome::NotFound => bail!("no user named '{}'", user_name),
                OperationOutcome::Failed(reason) => {
                    bail!("could not remove '{}': {}", user_name, reason)
                }
            }
        }
    }
}

/// Build a find query from command-line options.
///
/// Sort keys take a leading '-' for descending order.
fn list_query(
    prefix: Option<&str>,
    group: Option<&str>,
    sort: &[String],
    start: u64,
    count: Option<u64>,
) -> Result<FindQuery> {
    let mut filter: Option<FilterExpression> = None;
    if let Some(prefix) = prefix {
        filter = Some(FilterExpression::starts_with(fields::USER_NAME, prefix));
    }
    if let Some(group) = group {
        let by_group = FilterExpression::equals(fields::GROUPS, group);
        filter = Some(match filter {
            Some(f) => f.and(by_group),
            None => by_group,
        });
    }

    let mut criteria = SortCriteria::new();
    for key in sort {
        let (name, descending) = match key.strip_prefix('-') {
            Some(name) => (name, true),
            None => (key.as_str(), false),
        };
        let Some(field) = fields::canonical(name) else {
            bail!("unknown sort field '{}'", name);
        };
        criteria.push(if descending {
            SortCriterion::descending(field)
        } else {
            SortCriterion::ascending(field)
        });
    }
    if criteria.is_empty() {
        criteria.push(SortCriterion::ascending(fields::USER_NAME));
    }

    let query = FindQuery {
        filter,
        ..FindQuery::default()
    };
    Ok(query.sorted_by(criteria).window(start, count))
}

fn print_users(ctx: &CommandContext, users: &[User]) -> Result<()> {
    if ctx.is_json() {
        let result = ListResult {
            users,
            total: users.len(),
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("(no users)");
        return Ok(());
    }
    println!("{:<24} {:<32} {:<24} GROUPS", "USER", "EMAIL", "DISPLAY NAME");
    for user in users {
        println!(
            "{:<24} {:<32} {:<24} {}",
            user.user_name,
            user.email.as_deref().unwrap_or("-"),
            user.display_name.as_deref().unwrap_or("-"),
            user.groups.join(",")
        );
    }
    println!("\n{} user(s)", users.len());
    Ok(())
}
