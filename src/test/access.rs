#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::access::{can_access, decide};
    use crate::auth::Role;
    use crate::db::Page;
    use crate::db::materials::{Audience, MaterialFilters, list_materials};
    use crate::db::users::get_auth_user;
    use crate::models::{MaterialKind, MaterialStatus, Visibility};
    use crate::test::utils::{MaterialSeed, TestEnvBuilder};

    const STATUSES: [MaterialStatus; 2] = [MaterialStatus::Active, MaterialStatus::Inactive];
    const KINDS: [MaterialKind; 2] = [MaterialKind::Module, MaterialKind::Publication];
    const VISIBILITIES: [Visibility; 2] = [Visibility::Public, Visibility::Private];

    /// Independent statement of the policy, one rule per line.
    fn expected(
        role: Role,
        user_course: Option<&str>,
        status: MaterialStatus,
        kind: MaterialKind,
        visibility: Visibility,
        material_course: Option<&str>,
    ) -> bool {
        if role == Role::Admin || role == Role::ContentManager {
            return true;
        }
        if status == MaterialStatus::Inactive {
            return false;
        }
        if kind == MaterialKind::Module {
            return true;
        }
        if visibility == Visibility::Public {
            return true;
        }
        let material_course = material_course.filter(|c| !c.trim().is_empty());
        matches!((user_course, material_course), (Some(a), Some(b)) if a == b)
    }

    #[test]
    fn decision_matches_rules_for_every_combination() {
        let user_courses = [None, Some("Engenharia")];
        let material_courses = [None, Some("Engenharia"), Some("Direito"), Some("  ")];
        let mut checked = 0;

        for role in Role::ALL {
            for user_course in user_courses {
                for status in STATUSES {
                    for kind in KINDS {
                        for visibility in VISIBILITIES {
                            for material_course in material_courses {
                                let got = decide(
                                    *role,
                                    user_course,
                                    status,
                                    kind,
                                    visibility,
                                    material_course,
                                );
                                let want = expected(
                                    *role,
                                    user_course,
                                    status,
                                    kind,
                                    visibility,
                                    material_course,
                                );
                                assert_eq!(
                                    got, want,
                                    "role={role} user_course={user_course:?} status={status} kind={kind} visibility={visibility} material_course={material_course:?}"
                                );
                                checked += 1;
                            }
                        }
                    }
                }
            }
        }

        assert_eq!(checked, 3 * 2 * 2 * 2 * 2 * 4);
    }

    #[test]
    fn private_publication_needs_matching_course() {
        let allowed = |user: Option<&str>, material: Option<&str>| {
            decide(
                Role::User,
                user,
                MaterialStatus::Active,
                MaterialKind::Publication,
                Visibility::Private,
                material,
            )
        };

        assert!(allowed(Some("Direito"), Some("Direito")));
        assert!(!allowed(Some("Direito"), Some("Engenharia")));
        assert!(!allowed(None, Some("Direito")));
        assert!(!allowed(Some("Direito"), None));
        assert!(!allowed(None, None));
    }

    #[rocket::async_test]
    async fn list_filter_agrees_with_decision_for_every_row() {
        let mut builder = TestEnvBuilder::new()
            .user("student_eng", Some("Engenharia"))
            .user("student_none", None)
            .content_manager("manager")
            .admin("admin");

        let mut index = 0;
        for inactive in [false, true] {
            for course in [None, Some("Engenharia"), Some("Direito")] {
                let seeds = [
                    MaterialSeed::module(course.unwrap_or("")),
                    MaterialSeed::publication(Visibility::Public, course),
                    MaterialSeed::publication(Visibility::Private, course),
                ];
                for seed in seeds {
                    let seed = if inactive { seed.inactive() } else { seed };
                    builder = builder.material(&format!("m{}", index), seed);
                    index += 1;
                }
            }
        }
        let env = builder.build().await.unwrap();

        let admin = get_auth_user(&env.pool, &env.user_id("admin"))
            .await
            .unwrap()
            .unwrap();
        let everything = list_materials(
            &env.pool,
            Audience::Member(&admin),
            &MaterialFilters::default(),
            Page { page: 1, limit: 100 },
        )
        .await
        .unwrap();
        assert_eq!(everything.total, index);

        for code in ["student_eng", "student_none", "manager", "admin"] {
            let user = get_auth_user(&env.pool, &env.user_id(code))
                .await
                .unwrap()
                .unwrap();

            let listed: BTreeSet<String> = list_materials(
                &env.pool,
                Audience::Member(&user),
                &MaterialFilters::default(),
                Page { page: 1, limit: 100 },
            )
            .await
            .unwrap()
            .items
            .into_iter()
            .map(|m| m.id)
            .collect();

            let decided: BTreeSet<String> = everything
                .items
                .iter()
                .filter(|m| can_access(&user, m))
                .map(|m| m.id.clone())
                .collect();

            assert_eq!(listed, decided, "list and decision disagree for {}", code);
        }
    }
}
