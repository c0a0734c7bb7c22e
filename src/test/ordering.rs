#[cfg(test)]
mod tests {
    use crate::db::{create_content, create_module, delete_module, get_contents, get_modules};
    use crate::error::AppError;
    use crate::models::NewItem;
    use crate::ordering::{OrderedInsert, Partition};
    use crate::test::utils::{TestDbBuilder, create_standard_test_db};

    use rocket::tokio;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    fn note(title: &str) -> NewItem {
        NewItem::Text {
            title: title.to_string(),
            content: format!("{} body", title),
        }
    }

    #[tokio::test]
    async fn test_positions_start_at_zero_and_increase() {
        let test_db = TestDbBuilder::new()
            .instructor("tutor")
            .subject("Mathematics", "mathematics")
            .course("tutor", "mathematics", "Algebra", "algebra")
            .build()
            .await
            .unwrap();
        let course_id = test_db.course_id("algebra");

        for expected in 0..4 {
            let placed = create_module(&test_db.pool, course_id, &format!("M{}", expected), "", None)
                .await
                .unwrap();
            assert_eq!(placed.order, expected);
        }

        let orders: Vec<i64> = get_modules(&test_db.pool, course_id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_partitions_are_numbered_independently() {
        let test_db = create_standard_test_db().await;

        let algebra = create_module(&test_db.pool, test_db.course_id("algebra"), "Extra", "", None)
            .await
            .unwrap();
        let rust = create_module(&test_db.pool, test_db.course_id("rust-basics"), "Ownership", "", None)
            .await
            .unwrap();

        // algebra already has two modules
        assert_eq!(algebra.order, 2);
        assert_eq!(rust.order, 0);

        let linear = test_db.module_id("Linear equations");
        let quadratics = test_db.module_id("Quadratics");
        let second = create_content(&test_db.pool, linear, test_db.user_id("instructor1"), &note("Second"), None)
            .await
            .unwrap();
        let first = create_content(&test_db.pool, quadratics, test_db.user_id("instructor1"), &note("First"), None)
            .await
            .unwrap();

        assert_eq!(second.order, 1);
        assert_eq!(first.order, 0);
    }

    #[tokio::test]
    async fn test_explicit_position_is_kept_and_next_follows_maximum() {
        let test_db = create_standard_test_db().await;
        let course_id = test_db.course_id("rust-basics");

        let placed = create_module(&test_db.pool, course_id, "Later", "", Some(5))
            .await
            .unwrap();
        assert_eq!(placed.order, 5);

        let next = create_module(&test_db.pool, course_id, "After", "", None)
            .await
            .unwrap();
        assert_eq!(next.order, 6);

        let gap = create_module(&test_db.pool, course_id, "Gap", "", Some(0))
            .await
            .unwrap();
        assert_eq!(gap.order, 0);

        let titles: Vec<String> = get_modules(&test_db.pool, course_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Gap", "Later", "After"]);
    }

    #[tokio::test]
    async fn test_taken_position_is_rejected() {
        let test_db = create_standard_test_db().await;
        let course_id = test_db.course_id("algebra");

        let result = create_module(&test_db.pool, course_id, "Clash", "", Some(1)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let modules = get_modules(&test_db.pool, course_id).await.unwrap();
        assert_eq!(modules.len(), 2);
    }

    #[tokio::test]
    async fn test_negative_position_is_rejected() {
        let test_db = create_standard_test_db().await;

        let result = create_module(&test_db.pool, test_db.course_id("algebra"), "Nope", "", Some(-1)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_partition_is_rejected() {
        let test_db = create_standard_test_db().await;

        let result = create_module(&test_db.pool, 9999, "Orphan", "", None).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let mut conn = test_db.pool.acquire().await.unwrap();
        let result = OrderedInsert::new(Partition::Module(9999))
            .column("item_id", 1_i64)
            .execute(&mut conn)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failed_content_insert_leaves_no_item_behind() {
        let test_db = create_standard_test_db().await;
        let module_id = test_db.module_id("Linear equations");

        let items_before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&test_db.pool)
            .await
            .unwrap();

        let result = create_content(
            &test_db.pool,
            module_id,
            test_db.user_id("instructor1"),
            &note("Clash"),
            Some(0),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let items_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
        assert_eq!(items_before, items_after);
    }

    #[tokio::test]
    async fn test_next_position_follows_maximum_after_delete() {
        let test_db = create_standard_test_db().await;
        let course_id = test_db.course_id("algebra");

        delete_module(&test_db.pool, test_db.module_id("Quadratics"))
            .await
            .unwrap();

        // maximum is now 0 again, so the next module takes 1
        let placed = create_module(&test_db.pool, course_id, "Replacement", "", None)
            .await
            .unwrap();
        assert_eq!(placed.order, 1);

        let contents = get_contents(&test_db.pool, test_db.module_id("Linear equations"))
            .await
            .unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].order, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_get_distinct_positions() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("ordering.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        sqlx::query("INSERT INTO users (id, username, password, role) VALUES (1, 'tutor', 'x', 'instructor')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO subjects (id, title, slug) VALUES (1, 'Mathematics', 'mathematics')")
            .execute(&pool)
            .await
            .unwrap();
        let course_id = crate::db::create_course(&pool, 1, 1, "Algebra", "algebra", "Numbers")
            .await
            .unwrap()
            .id;

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    create_module(&pool, course_id, &format!("Module {}", i), "", None).await
                })
            })
            .collect();

        let mut orders = Vec::new();
        for task in tasks {
            orders.push(task.await.unwrap().unwrap().order);
        }
        orders.sort();

        assert_eq!(orders, (0..20).collect::<Vec<i64>>());
    }
}
